//! Line classification for the escan text format.
//!
//! Every line either switches the current section (a `;`/`#` header line
//! whose text starts with a known keyword), starts or continues the numeric
//! table, or is a body line of whatever section is active.

/// Section keywords, in matching priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    TwoD,
    EpicsScan,
    UserTitles,
    PvList,
    Rule,
    DoubleRule,
    ScanBegan,
    ScanEnded,
    ColumnLabels,
    ScanRegions,
    Data,
}

const VOCABULARY: [(&str, Section); 11] = [
    ("2d", Section::TwoD),
    ("epics scan", Section::EpicsScan),
    ("user titles", Section::UserTitles),
    ("pv list", Section::PvList),
    ("-----", Section::Rule),
    ("=====", Section::DoubleRule),
    ("scan began at", Section::ScanBegan),
    ("scan ended at", Section::ScanEnded),
    ("column labels", Section::ColumnLabels),
    ("scan regions", Section::ScanRegions),
    ("data", Section::Data),
];

/// Lines shorter than this are separators.
const MIN_LINE_LEN: usize = 3;

impl Section {
    /// Look up the section a comment body (marker already stripped) opens.
    #[must_use]
    pub fn from_header(text: &str) -> Option<Self> {
        let text = text.trim().to_lowercase();
        VOCABULARY
            .iter()
            .find(|(keyword, _)| text.starts_with(keyword))
            .map(|&(_, section)| section)
    }
}

/// What a single raw line is, independent of the current section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Too short to carry content.
    Blank,
    /// Comment line opening a section.
    Header(Section),
    /// Comment line that is not a header.
    Comment,
    /// Uncommented line whose first token is a number.
    Numeric,
    /// Any other uncommented line.
    Text,
}

/// Returns true if the line starts with a comment marker.
#[must_use]
pub fn is_comment(line: &str) -> bool {
    line.starts_with(';') || line.starts_with('#')
}

/// Remove a leading comment marker and surrounding whitespace.
#[must_use]
pub fn strip_marker(line: &str) -> &str {
    line.strip_prefix([';', '#']).unwrap_or(line).trim()
}

/// Classify one raw line.
#[must_use]
pub fn classify(line: &str) -> LineKind {
    if line.chars().count() < MIN_LINE_LEN {
        return LineKind::Blank;
    }
    if is_comment(line) {
        return match Section::from_header(&line[1..]) {
            Some(section) => LineKind::Header(section),
            None => LineKind::Comment,
        };
    }
    let numeric = line
        .split_whitespace()
        .next()
        .is_some_and(|w| w.parse::<f64>().is_ok());
    if numeric {
        LineKind::Numeric
    } else {
        LineKind::Text
    }
}

/// Section state machine.
///
/// The state is the active section, or `None` before any header (the
/// free-form `key = value` region). Headers switch the state; numeric lines
/// switch it to [`Section::Data`]; everything else inherits it.
#[derive(Debug, Default, Clone)]
pub struct ModeMachine {
    mode: Option<Section>,
}

impl ModeMachine {
    /// Create a machine in the unset state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current section.
    #[must_use]
    pub fn mode(&self) -> Option<Section> {
        self.mode
    }

    /// Return to the unset state.
    pub fn reset(&mut self) {
        self.mode = None;
    }

    /// Classify `line` and apply its transition.
    pub fn feed(&mut self, line: &str) -> LineKind {
        let kind = classify(line);
        match kind {
            LineKind::Header(section) => self.mode = Some(section),
            LineKind::Numeric => self.mode = Some(Section::Data),
            LineKind::Blank | LineKind::Comment | LineKind::Text => {}
        }
        kind
    }
}
