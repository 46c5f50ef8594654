//! Visit subject and place option codes shared with the server.
//!
//! Records store the numeric code; labels are for display and logs only.

const VISIT_SUBJECTS: &[(&str, &str)] = &[
    ("1", "Standard visit to strengthen recommendations and CBC cooperation"),
    ("2", "Individual training - collection process"),
    ("3", "Examination of problematic collection"),
    ("4", "Hospital kit delivery"),
    ("5", "Pregnancy preparation lecture for pregnant women"),
    ("6", "Group lecture for midwives"),
    ("7", "Group lecture for doctors"),
    ("8", "Hospital contract management"),
    ("9", "Doctor contract management"),
    ("10", "Business partner contract management - other collaborator"),
    ("11", "Other"),
    ("12", "Phone call / Video conference"),
];

const VISIT_PLACES: &[(&str, &str)] = &[
    ("1", "Department of Obstetrics, Hospital"),
    ("2", "Private doctor's office"),
    ("3", "State doctor's office"),
    ("4", "Hospital management department"),
    ("5", "Other"),
    ("6", "Phone call / Video conference"),
];

fn lookup<'a>(table: &'static [(&'static str, &'static str)], code: &'a str) -> &'a str {
    table
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
        .unwrap_or(code)
}

/// English label for a visit subject code; unknown codes are returned as-is.
pub fn visit_type_label(code: &str) -> &str {
    lookup(VISIT_SUBJECTS, code)
}

/// English label for a visit place code; unknown codes are returned as-is.
pub fn place_label(code: &str) -> &str {
    lookup(VISIT_PLACES, code)
}
