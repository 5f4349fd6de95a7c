//! Heuristic field extraction from noisy card transcriptions.
//!
//! Each field has its own cascade of patterns, most specific first. A
//! cascade returns the first value that passes validation, or `None`.
//! Extractors never fail: a missing field is a normal outcome.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::{Captures, Regex};

use crate::config::FieldConfig;
use crate::types::{AcademicTerm, CardFields};

/// Uppercase Vietnamese letters carrying diacritics.
pub const VI_UPPER: &str = "ÁÀẢÃẠĂẮẰẲẴẶÂẤẦẨẪẬÉÈẺẼẸÊẾỀỂỄỆÍÌỈĨỊÓÒỎÕỌÔỐỒỔỖỘƠỚỜỞỠỢÚÙỦŨỤƯỨỪỬỮỰÝỲỶỸỴĐ";

const NAME_WINDOW_CHARS: usize = 150;
const NAME_MAX_CHARS: usize = 35;
const LABELED_BIRTH_YEARS: std::ops::RangeInclusive<i32> = 1900..=2010;
const SCANNED_BIRTH_YEARS: std::ops::RangeInclusive<i32> = 2000..=2010;
const TERM_START_YEARS: std::ops::RangeInclusive<i32> = 2000..=2100;
const TERM_LENGTHS: std::ops::RangeInclusive<i32> = 1..=6;
const TERM_MAX_GAP_CHARS: usize = 20;
const WINDOW_TERM_LENGTHS: std::ops::RangeInclusive<i32> = 3..=7;
const EXPIRY_YEARS: std::ops::RangeInclusive<i32> = 2020..=2100;

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| {
                Regex::new(&$pattern).expect(concat!(stringify!($name), " must compile"))
            })
        }
    };
}

macro_rules! static_regex_list {
    ($name:ident, [$($pattern:expr),+ $(,)?]) => {
        fn $name() -> &'static [Regex] {
            static RES: OnceLock<Vec<Regex>> = OnceLock::new();
            RES.get_or_init(|| {
                vec![$(
                    Regex::new(&$pattern).expect(concat!(stringify!($name), " must compile"))
                ),+]
            })
        }
    };
}

static_regex!(digit_run_re, r"[0-9]+");
static_regex!(year_re, r"[0-9]{4}");

static_regex_list!(
    id_label_res,
    [
        r"(?i)M[ãa]\s*SV\s*:?\s*[^0-9]*?([A-Z]?[0-9]{6,10})",
        r"(?i)MSSV\s*:?\s*[^0-9]*?([A-Z]?[0-9]{6,10})",
        r"(?i)M[ãa]\s*s[ốo]\s*:?\s*([A-Z]?[0-9]{6,10})",
        r"(?i)STUDENT\s*ID\s*:?\s*([A-Z]?[0-9]{6,10})",
        r"(?i)\b(?:ID|No)\.?\s*:?\s*([A-Z]?[0-9]{6,10})",
    ]
);

const NAME_TERMINATORS: &str = r"(?:[:|]|\n|Ngày|Mã|Niên|Date|ID|[0-9]{1,2}[/-]|$)";

static_regex_list!(
    name_label_res,
    [
        format!(
            r"(?i)\bH[oọ]\s*(?:&|và|va)\s*t[êe]n?\.?\s*:?\s*([A-Z{VI_UPPER}\s\-]+?){NAME_TERMINATORS}"
        ),
        format!(r"(?i)\bH[oọ]\s+t[êe]n\.?\s*:?\s*([A-Z{VI_UPPER}\s\-]+?){NAME_TERMINATORS}"),
        format!(
            r"(?i)Full\s*Name\s*:?\s*([A-Z{VI_UPPER}\s]+?)(?:\n|Date|ID|[0-9]{{1,2}}[/-]|$)"
        ),
        format!(r"(?i)\bT[êe]n\b\s*:?\s*([A-Z{VI_UPPER}\s]+?)(?:\n|Ngày|Mã|[0-9]{{1,2}}[/-]|$)"),
        format!(r"(?i)\b(?:Họ|Tên|Ho)\b[ \t&]*\.?[ \t]*:?[ \t]*([A-Z{VI_UPPER} \t\-]{{3,30}})"),
    ]
);

static_regex!(name_anchor_re, r"(?i)\bH[oọ]\s*(?:&|và|va)?\s*t[êe]n?\b");
static_regex!(
    window_run_re,
    format!(r"[A-Z{VI_UPPER}]+(?:[ \t]+[A-Z{VI_UPPER}]+){{1,4}}")
);
static_regex!(
    line_run_re,
    format!(r"[A-Z{VI_UPPER}]+(?:[ \t.,&'\-]+[A-Z{VI_UPPER}]+)+")
);

static_regex!(
    birth_label_re,
    r"(?i)(?:Ngày\s*sinh|Date\s*of\s*Birth|Sinh|DOB)\s*:?\s*([0-9]{1,2})[-/]([0-9]{1,2})[-/]([0-9]{4})"
);

static_regex!(
    term_label_re,
    r"(?i)(?:Niên\s*kh[oó][aá]|Academic\s*Year)\s*:?\s*([0-9]{4})\s*[-/]\s*([0-9]{4})"
);
static_regex!(term_pair_re, r"\b([0-9]{4})\s*[-/]\s*([0-9]{4})\b");

static_regex!(
    expiry_label_re,
    r"(?i)(?:gi[áa]\s*tr[ịrđêi]+|valid\s+(?:until|to|thru)|good\s+thru|expiry(?:\s+date)?|expires?|h[ếe]t\s+h[ạa]n)[^0-9]{0,40}?(?:([0-9]{1,2})[-/]([0-9]{1,2})[-/]([0-9]{4})|([0-9]{1,2})[-/]([0-9]{2})\b)"
);
static_regex!(any_date_re, r"([0-9]+)[-/]([0-9]+)[-/]([0-9]+)");

fn digit_runs(text: &str) -> Vec<&str> {
    digit_run_re().find_iter(text).map(|m| m.as_str()).collect()
}

fn group_i32(caps: &Captures<'_>, i: usize) -> Option<i32> {
    caps.get(i)?.as_str().parse().ok()
}

fn truncated(digits: &str, len: usize) -> String {
    digits.chars().take(len).collect()
}

fn has_diacritic(word: &str) -> bool {
    word.chars()
        .flat_map(char::to_uppercase)
        .any(|c| VI_UPPER.contains(c))
}

fn day_month_year(day: i32, month: i32, year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    if !(1..=12).contains(&month) {
        return None;
    }
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    first_of_next.pred_opt()
}

/// Two-digit card years: above 50 is the 1900s, otherwise the 2000s.
fn expand_two_digit_year(yy: i32) -> i32 {
    if yy > 50 {
        1900 + yy
    } else {
        2000 + yy
    }
}

/// Earliest candidate with the smallest key.
fn first_min_by_key<T, K: Ord>(items: impl IntoIterator<Item = T>, key: impl Fn(&T) -> K) -> Option<T> {
    let mut best: Option<(K, T)> = None;
    for item in items {
        let k = key(&item);
        match &best {
            Some((best_k, _)) if k >= *best_k => {}
            _ => best = Some((k, item)),
        }
    }
    best.map(|(_, item)| item)
}

pub struct FieldParser {
    config: FieldConfig,
    excluded_words: HashSet<String>,
    excluded_phrases: Vec<String>,
}

impl FieldParser {
    pub fn new(config: FieldConfig) -> Self {
        let mut excluded_words = HashSet::new();
        let mut excluded_phrases = Vec::new();
        for entry in &config.exclude_words {
            let upper = entry.trim().to_uppercase();
            if upper.contains(char::is_whitespace) {
                excluded_phrases.push(upper);
            } else if !upper.is_empty() {
                excluded_words.insert(upper);
            }
        }
        Self {
            config,
            excluded_words,
            excluded_phrases,
        }
    }

    /// Run every extractor over one transcription.
    pub fn parse(&self, text: &str) -> CardFields {
        let fields = CardFields {
            id_number: self.parse_id_number(text),
            full_name: self.parse_full_name(text),
            birth_date: self.parse_birth_date(text),
            academic_term: self.parse_academic_term(text),
            expiry_date: self.parse_expiry_date(text),
        };
        tracing::debug!(found = fields.count(), ?fields, "parsed card fields");
        fields
    }

    /// Student ID number.
    ///
    /// Labeled forms first, then bare digit runs: a full-length run with the
    /// issuing prefix, two adjacent runs that merge into one, a 6–10 digit
    /// prefixed run, and finally the longest run of at least six digits.
    pub fn parse_id_number(&self, text: &str) -> Option<String> {
        for re in id_label_res() {
            if let Some(id) = re.captures(text).and_then(|c| c.get(1)) {
                return Some(id.as_str().to_string());
            }
        }

        let prefix = self.config.id_prefix.as_str();
        let len = self.config.id_length;
        let runs = digit_runs(text);

        if let Some(run) = runs.iter().find(|r| r.len() == len && r.starts_with(prefix)) {
            return Some(run.to_string());
        }

        for pair in runs.windows(2) {
            if pair[0].len() >= 4 && pair[1].len() >= 4 {
                let merged = format!("{}{}", pair[0], pair[1]);
                if merged.len() == len && merged.starts_with(prefix) {
                    tracing::debug!(id = %merged, "merged split ID number");
                    return Some(merged);
                }
            }
        }

        if let Some(run) = runs
            .iter()
            .find(|r| (6..=10).contains(&r.len()) && r.starts_with(prefix))
        {
            return Some(truncated(run, len));
        }

        let mut longest: Option<&str> = None;
        for run in runs.iter().filter(|r| r.len() >= 6) {
            if longest.map_or(true, |l| run.len() > l.len()) {
                longest = Some(*run);
            }
        }
        longest.map(|run| truncated(run, len))
    }

    /// Person's full name.
    pub fn parse_full_name(&self, text: &str) -> Option<String> {
        for re in name_label_res() {
            let Some(raw) = re.captures(text).and_then(|c| c.get(1)) else {
                continue;
            };
            if let Some(name) = self.clean_name(raw.as_str()) {
                return Some(name);
            }
        }

        for label in name_anchor_re().find_iter(text) {
            let window: String = text[label.end()..].chars().take(NAME_WINDOW_CHARS).collect();
            let Some(run) = window_run_re().find(&window) else {
                continue;
            };
            if let Some(name) = self.clean_name(run.as_str()) {
                return Some(name);
            }
        }

        let candidates = text
            .lines()
            .flat_map(|line| line_run_re().find_iter(line))
            .filter_map(|run| self.clean_name(run.as_str()));
        first_min_by_key(candidates, |name| {
            let words = name.split_whitespace().count();
            (!(3..=4).contains(&words), name.chars().count())
        })
    }

    /// Normalize a raw name capture; `None` if it does not look like a name.
    fn clean_name(&self, raw: &str) -> Option<String> {
        let spaced: String = raw
            .chars()
            .map(|c| if c.is_alphabetic() { c } else { ' ' })
            .collect();
        let mut words: Vec<&str> = spaced
            .split_whitespace()
            .filter(|w| w.chars().count() >= 2)
            .filter(|w| !self.excluded_words.contains(&w.to_uppercase()))
            .collect();

        // Short trailing tokens without diacritics are OCR noise.
        while let Some(last) = words.last() {
            if last.chars().count() < 3 && !has_diacritic(last) {
                words.pop();
            } else {
                break;
            }
        }

        if !(2..=5).contains(&words.len()) {
            return None;
        }
        let name = words.join(" ");
        if name.chars().count() > NAME_MAX_CHARS {
            return None;
        }
        let upper = name.to_uppercase();
        if self.excluded_phrases.iter().any(|p| upper.contains(p.as_str())) {
            return None;
        }
        Some(name)
    }

    /// Date of birth, closest to the configured anchor year.
    pub fn parse_birth_date(&self, text: &str) -> Option<NaiveDate> {
        let mut found = Vec::new();

        for caps in birth_label_re().captures_iter(text) {
            let (Some(d), Some(m), Some(y)) =
                (group_i32(&caps, 1), group_i32(&caps, 2), group_i32(&caps, 3))
            else {
                continue;
            };
            if LABELED_BIRTH_YEARS.contains(&y) {
                found.extend(day_month_year(d, m, y));
            }
        }

        let runs = digit_runs(text);
        for triple in runs.windows(3) {
            let (d, m, y) = (triple[0], triple[1], triple[2]);
            if !(1..=2).contains(&d.len()) || !(1..=2).contains(&m.len()) || y.len() != 4 {
                continue;
            }
            let (Ok(d), Ok(m), Ok(y)) = (d.parse(), m.parse(), y.parse::<i32>()) else {
                continue;
            };
            if SCANNED_BIRTH_YEARS.contains(&y) {
                found.extend(day_month_year(d, m, y));
            }
        }

        let anchor = self.config.birth_year_anchor;
        first_min_by_key(found, |date| (date.year() - anchor).abs())
    }

    /// Academic term `YYYY-YYYY`, start year closest to the configured anchor.
    pub fn parse_academic_term(&self, text: &str) -> Option<AcademicTerm> {
        let anchor = self.config.term_year_anchor;
        let closest = |terms: Vec<AcademicTerm>| {
            first_min_by_key(terms, |t| (t.start - anchor).abs())
        };
        let plausible = |start: i32, end: i32| {
            (TERM_START_YEARS.contains(&start) && TERM_LENGTHS.contains(&(end - start)))
                .then_some(AcademicTerm { start, end })
        };
        let from_caps = |caps: Captures<'_>| plausible(group_i32(&caps, 1)?, group_i32(&caps, 2)?);

        let labeled: Vec<_> = term_label_re().captures_iter(text).filter_map(&from_caps).collect();
        if let Some(term) = closest(labeled) {
            return Some(term);
        }

        let delimited: Vec<_> = term_pair_re().captures_iter(text).filter_map(&from_caps).collect();
        if let Some(term) = closest(delimited) {
            return Some(term);
        }

        let years: Vec<(i32, usize, usize)> = year_re()
            .find_iter(text)
            .filter_map(|m| Some((m.as_str().parse().ok()?, m.start(), m.end())))
            .collect();

        let nearby: Vec<_> = years
            .windows(2)
            .filter(|pair| text[pair[0].2..pair[1].1].chars().count() <= TERM_MAX_GAP_CHARS)
            .filter_map(|pair| plausible(pair[0].0, pair[1].0))
            .collect();
        if let Some(term) = closest(nearby) {
            return Some(term);
        }

        let window = self.config.issuance_window_start..=self.config.issuance_window_end;
        let issued: Vec<_> = years
            .windows(2)
            .map(|pair| (pair[0].0, pair[1].0))
            .filter(|(start, end)| {
                window.contains(start) && WINDOW_TERM_LENGTHS.contains(&(end - start))
            })
            .map(|(start, end)| AcademicTerm { start, end })
            .collect();
        closest(issued)
    }

    /// Card expiry date, furthest-future candidate.
    ///
    /// Accepts `D/M/Y` or `M/YY` after a "valid until" style label. The
    /// impossible date 31/11 is read as 31/12.
    pub fn parse_expiry_date(&self, text: &str) -> Option<NaiveDate> {
        let mut found = Vec::new();

        for caps in expiry_label_re().captures_iter(text) {
            let date = if let (Some(d), Some(m), Some(y)) =
                (group_i32(&caps, 1), group_i32(&caps, 2), group_i32(&caps, 3))
            {
                let m = if d == 31 && m == 11 {
                    tracing::debug!(year = y, "repairing 31/11 expiry to 31/12");
                    12
                } else {
                    m
                };
                day_month_year(d, m, y)
            } else if let (Some(m), Some(yy)) = (group_i32(&caps, 4), group_i32(&caps, 5)) {
                u32::try_from(m)
                    .ok()
                    .and_then(|m| last_day_of_month(expand_two_digit_year(yy), m))
            } else {
                None
            };
            if let Some(date) = date.filter(|d| EXPIRY_YEARS.contains(&d.year())) {
                found.push(date);
            }
        }

        if found.is_empty() {
            for caps in any_date_re().captures_iter(text) {
                let (Some(d), Some(m), Some(y)) = (caps.get(1), caps.get(2), caps.get(3)) else {
                    continue;
                };
                if d.len() > 2 || m.len() > 2 || y.len() != 4 || !y.as_str().starts_with("20") {
                    continue;
                }
                let (Ok(d), Ok(m), Ok(y)) = (
                    d.as_str().parse(),
                    m.as_str().parse(),
                    y.as_str().parse::<i32>(),
                ) else {
                    continue;
                };
                if (2020..=2099).contains(&y) {
                    found.extend(day_month_year(d, m, y));
                }
            }
        }

        let mut latest: Option<NaiveDate> = None;
        for date in found {
            if latest.map_or(true, |l| date.year() > l.year()) {
                latest = Some(date);
            }
        }
        latest
    }
}
