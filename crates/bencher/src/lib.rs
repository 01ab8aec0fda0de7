/// How many headers a benchmark parses eagerly.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParseMode {
    /// Every header of the fixtures is in the eager set
    Eager,
    /// The built-in default eager set
    Selective,
    /// Only `content-length`
    Deferred,
}

impl ParseMode {
    pub const ALL: [ParseMode; 3] = [ParseMode::Eager, ParseMode::Selective, ParseMode::Deferred];

    /// The `headers_to_parse` setting for this mode.
    pub fn headers_to_parse(self, fixture: &Fixture) -> Option<String> {
        match self {
            ParseMode::Eager => Some(fixture.header_names().join(",")),
            ParseMode::Selective => None,
            ParseMode::Deferred => Some(String::new()),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ParseMode::Eager => "eager",
            ParseMode::Selective => "selective",
            ParseMode::Deferred => "deferred",
        }
    }
}

/// A raw SIP message used as benchmark input.
#[derive(Debug, Copy, Clone)]
pub struct Fixture {
    file_name: &'static str,
    content: &'static str,
}

impl Fixture {
    pub const fn new(file_name: &'static str, content: &'static str) -> Self {
        Self { file_name, content }
    }

    pub fn content(&self) -> &'static str {
        self.content
    }

    pub fn bytes(&self) -> &'static [u8] {
        self.content.as_bytes()
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }

    /// Names of the headers in the fixture, continuation lines skipped.
    pub fn header_names(&self) -> Vec<&'static str> {
        let head = self.content.split("\r\n\r\n").next().unwrap_or_default();
        head.split("\r\n")
            .skip(1)
            .filter(|line| !line.starts_with([' ', '\t']))
            .filter_map(|line| line.split_once(':').map(|(name, _)| name.trim()))
            .collect()
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    mode: ParseMode,
    fixture: Fixture,
}

impl TestCase {
    pub fn new(name: &'static str, mode: ParseMode, fixture: Fixture) -> Self {
        Self { name, mode, fixture }
    }

    /// One case per [`ParseMode`], named `<prefix>_<mode>`.
    pub fn all_modes(prefix: &'static str, fixture: Fixture) -> Vec<(String, TestCase)> {
        ParseMode::ALL.iter().map(|mode| (format!("{prefix}_{}", mode.name()), Self::new(prefix, *mode, fixture))).collect()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }
}
