//! Remote path joining

/// Joins remote path segments with `separator`
///
/// Returns `None` for no segments and the single segment unchanged for one.
/// Segments are concatenated left to right with one separator between each
/// pair; nothing is collapsed or normalized, so a segment that already ends
/// in a separator produces a doubled one.
///
/// # Example
/// ```
/// use filexfer::path::remote_path_join;
///
/// assert_eq!(remote_path_join('/', &["pub", "example"]).as_deref(), Some("pub/example"));
/// assert_eq!(remote_path_join::<&str>('\\', &[]), None);
/// ```
pub fn remote_path_join<S: AsRef<str>>(separator: char, segments: &[S]) -> Option<String> {
    let (first, rest) = segments.split_first()?;
    let mut path = first.as_ref().to_string();
    for segment in rest {
        path.push(separator);
        path.push_str(segment.as_ref());
    }
    Some(path)
}
