//! Prompts for the remote image-description service.
//!
//! Callers can override the default via
//! [`crate::config::ProcessingConfig::description_prompt`]; the constant here
//! is used only when no override is provided.

/// Default prompt sent alongside each extracted picture.
pub const DEFAULT_DESCRIPTION_PROMPT: &str = "Describe the image in detail, including any text, \
objects, and layout. Be accurate and thorough.";

/// Prompt for a picture, adding its caption as context when the document has one.
pub fn description_prompt(base: &str, caption: Option<&str>) -> String {
    match caption.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => format!("{base}\n\nThe document captions this image: \"{c}\""),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_is_appended() {
        let p = description_prompt(DEFAULT_DESCRIPTION_PROMPT, Some("Figure 2: site plan"));
        assert!(p.starts_with(DEFAULT_DESCRIPTION_PROMPT));
        assert!(p.contains("Figure 2: site plan"));
    }

    #[test]
    fn blank_caption_is_ignored() {
        assert_eq!(
            description_prompt("Describe.", Some("   ")),
            "Describe.".to_string()
        );
        assert_eq!(description_prompt("Describe.", None), "Describe.");
    }
}
