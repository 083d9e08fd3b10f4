//! Whitespace minification of rewritten stylesheets via lightningcss.

use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};

use crate::error::MinifyError;

/// Parse and re-print `css` without insignificant whitespace.
pub fn minify_css(css: &str) -> Result<String, MinifyError> {
    let stylesheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| MinifyError::Parse(e.to_string()))?;

    let printer_options = PrinterOptions {
        minify: true,
        ..Default::default()
    };
    stylesheet
        .to_css(printer_options)
        .map(|result| result.code)
        .map_err(MinifyError::Print)
}
