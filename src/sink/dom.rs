//! DOM text sink
//!
//! Appends text nodes to an element looked up by id. The element is resolved
//! once, when the sink is attached.

use super::TextSink;
use crate::error::{BootError, BootResult};

/// A text sink backed by a DOM element
pub struct DomSink {
    element: web_sys::Element,
}

impl DomSink {
    /// Find the element with the given id
    ///
    /// Fails fast when the window, document or element is missing, so output
    /// is never silently dropped.
    pub fn attach(element_id: &str) -> BootResult<Self> {
        let unavailable = || BootError::SinkUnavailable {
            element: element_id.to_string(),
        };

        let element = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.get_element_by_id(element_id))
            .ok_or_else(unavailable)?;

        Ok(Self { element })
    }

    pub fn element(&self) -> &web_sys::Element {
        &self.element
    }
}

impl TextSink for DomSink {
    fn append(&mut self, text: &str) {
        // Appending a text node is equivalent to `textContent += text`
        // without re-serializing everything already displayed.
        if self.element.append_with_str_1(text).is_err() {
            let mut content = self.element.text_content().unwrap_or_default();
            content.push_str(text);
            self.element.set_text_content(Some(&content));
        }
    }
}
