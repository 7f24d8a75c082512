// src/utils/html.rs

/// Sanitizes teacher-authored question text.
///
/// Formatting tags used in questions (`<b>`, `<sup>`, `<p>`) survive; scripts,
/// iframes and event-handler attributes are stripped along with their content.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_formatting() {
        assert_eq!(clean_html("x<sup>2</sup> = <b>4</b>"), "x<sup>2</sup> = <b>4</b>");
    }

    #[test]
    fn test_strips_scripts_and_handlers() {
        let cleaned = clean_html("<p onclick=\"steal()\">Solve</p><script>alert(1)</script>");
        assert_eq!(cleaned, "<p>Solve</p>");
    }
}
