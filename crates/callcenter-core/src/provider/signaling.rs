//! Signaling documents returned to the provider in response to inbound webhooks
//!
//! The document is a small XML vocabulary: `<Dial>` rings one or more agent clients,
//! `<Enqueue>` parks the caller in a named provider queue with hold audio, `<Reject>`
//! refuses the call.

use crate::inbound::RoutingInstruction;

pub const CONTENT_TYPE: &str = "application/xml";

/// Rendered document plus its signature header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    pub content_type: &'static str,
    pub body: String,
    pub signature: Option<String>,
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn enqueue(queue: &str, hold_music_url: &str) -> String {
    format!(
        "<Enqueue waitUrl=\"{}\">{}</Enqueue>",
        escape(hold_music_url),
        escape(queue)
    )
}

/// Render a routing instruction
///
/// ```
/// use callcenter_core::inbound::RoutingInstruction;
/// use callcenter_core::provider::signaling::render;
///
/// let doc = render(&RoutingInstruction::Park {
///     queue: "overflow".into(),
///     hold_music_url: "https://media.example.com/hold.mp3".into(),
/// });
/// assert!(doc.contains("<Enqueue waitUrl=\"https://media.example.com/hold.mp3\">overflow</Enqueue>"));
/// ```
pub fn render(instruction: &RoutingInstruction) -> String {
    let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>");
    match instruction {
        RoutingInstruction::Ring {
            endpoints,
            timeout_secs,
            caller_id,
            overflow_queue,
            hold_music_url,
        } => {
            doc.push_str(&format!(
                "<Dial timeout=\"{}\" callerId=\"{}\">",
                timeout_secs,
                escape(caller_id)
            ));
            for endpoint in endpoints {
                doc.push_str(&format!("<Client>{}</Client>", escape(endpoint)));
            }
            doc.push_str("</Dial>");
            // Reached only when no client picks up before the dial timeout
            doc.push_str(&enqueue(overflow_queue, hold_music_url));
        }
        RoutingInstruction::Park { queue, hold_music_url } => {
            doc.push_str(&enqueue(queue, hold_music_url));
        }
        RoutingInstruction::Reject { reason } => {
            doc.push_str(&format!("<Reject reason=\"{}\"/>", escape(reason)));
        }
    }
    doc.push_str("</Response>");
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_lists_clients_in_order() {
        let doc = render(&RoutingInstruction::Ring {
            endpoints: vec!["agent-b".into(), "agent-a".into()],
            timeout_secs: 30,
            caller_id: "+15551112222".into(),
            overflow_queue: "overflow".into(),
            hold_music_url: "https://m/hold.mp3".into(),
        });

        let b = doc.find("<Client>agent-b</Client>").unwrap();
        let a = doc.find("<Client>agent-a</Client>").unwrap();
        assert!(b < a);
        assert!(doc.contains("timeout=\"30\""));
        assert!(doc.ends_with("</Enqueue></Response>"));
    }

    #[test]
    fn test_values_are_escaped() {
        let doc = render(&RoutingInstruction::Reject {
            reason: "a<b & \"c\"".into(),
        });
        assert!(doc.contains("reason=\"a&lt;b &amp; &quot;c&quot;\""));
    }
}
