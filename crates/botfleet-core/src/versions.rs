/// Known-good protocol versions, newest first.
const LADDER_1_21: &[&str] = &["1.21", "1.20.6", "1.20.4", "1.20.1"];
const LEGACY_TAIL: &str = "1.19.4";

/// Versions to try after `requested` failed with a version-class error.
/// `None` entries mean auto-detect, which is always the final rung.
pub fn fallback_ladder(requested: Option<&str>) -> Vec<Option<String>> {
    let mut ladder: Vec<&str> = LADDER_1_21.to_vec();
    if !requested.is_some_and(|v| v.starts_with("1.21")) {
        ladder.push(LEGACY_TAIL);
    }

    ladder
        .into_iter()
        .filter(|v| Some(*v) != requested)
        .map(|v| Some(v.to_owned()))
        .chain(std::iter::once(None))
        .collect()
}
