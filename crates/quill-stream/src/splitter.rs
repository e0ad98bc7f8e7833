/// Which output channel a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Chat,
    Plan,
}

/// Demultiplexes a single model stream into chat and plan channels.
///
/// The model emits in-band markers to switch channels mid-stream. Chunk
/// boundaries are arbitrary, so a marker may arrive split across chunks; a
/// lookahead buffer holds back just enough text that no marker substring is
/// ever emitted.
pub struct StreamSplitter {
    chat_marker: String,
    plan_marker: String,
    buffer: String,
    active: Channel,
    /// Characters held back for a marker that may still complete.
    keep: usize,
}

impl StreamSplitter {
    pub fn new(chat_marker: impl Into<String>, plan_marker: impl Into<String>) -> Self {
        let chat_marker = chat_marker.into();
        let plan_marker = plan_marker.into();
        let longest = chat_marker
            .chars()
            .count()
            .max(plan_marker.chars().count());
        Self {
            chat_marker,
            plan_marker,
            buffer: String::new(),
            active: Channel::Chat,
            keep: longest.saturating_sub(1).max(8),
        }
    }

    /// Feed one stream chunk; returns the fragments safe to emit, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<(Channel, String)> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();

        // Consume every complete marker currently in the buffer.
        loop {
            let chat_pos = self.buffer.find(&self.chat_marker);
            let plan_pos = self.buffer.find(&self.plan_marker);
            let (pos, marker_len, next) = match (chat_pos, plan_pos) {
                (Some(c), Some(p)) if c <= p => (c, self.chat_marker.len(), Channel::Chat),
                (Some(_), Some(p)) => (p, self.plan_marker.len(), Channel::Plan),
                (Some(c), None) => (c, self.chat_marker.len(), Channel::Chat),
                (None, Some(p)) => (p, self.plan_marker.len(), Channel::Plan),
                (None, None) => break,
            };
            if pos > 0 {
                out.push((self.active, self.buffer[..pos].to_string()));
            }
            self.buffer.drain(..pos + marker_len);
            self.active = next;
        }

        // No complete marker remains; anything beyond the lookahead window
        // cannot be part of one.
        let total = self.buffer.chars().count();
        if total > self.keep {
            let cut = self
                .buffer
                .char_indices()
                .nth(total - self.keep)
                .map(|(i, _)| i)
                .unwrap_or(self.buffer.len());
            if cut > 0 {
                let ready: String = self.buffer.drain(..cut).collect();
                out.push((self.active, ready));
            }
        }

        out
    }

    /// End of stream: flush whatever is still buffered to the active channel.
    pub fn finish(mut self) -> Option<(Channel, String)> {
        if self.buffer.is_empty() {
            None
        } else {
            let tail = std::mem::take(&mut self.buffer);
            Some((self.active, tail))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAT: &str = "[REPLY]";
    const PLAN: &str = "[PLAN]";

    /// Run a full stream through the splitter with the given chunking and
    /// collect the per-channel concatenations.
    fn split_with_chunks(source: &str, chunk_size: usize) -> (String, String) {
        let mut splitter = StreamSplitter::new(CHAT, PLAN);
        let mut chat = String::new();
        let mut plan = String::new();
        let chars: Vec<char> = source.chars().collect();
        for chunk in chars.chunks(chunk_size.max(1)) {
            let chunk: String = chunk.iter().collect();
            for (channel, text) in splitter.push(&chunk) {
                match channel {
                    Channel::Chat => chat.push_str(&text),
                    Channel::Plan => plan.push_str(&text),
                }
            }
        }
        if let Some((channel, text)) = splitter.finish() {
            match channel {
                Channel::Chat => chat.push_str(&text),
                Channel::Plan => plan.push_str(&text),
            }
        }
        (chat, plan)
    }

    #[test]
    fn plain_text_goes_to_chat() {
        let (chat, plan) = split_with_chunks("hello there", 4);
        assert_eq!(chat, "hello there");
        assert_eq!(plan, "");
    }

    #[test]
    fn marker_switches_to_plan() {
        let (chat, plan) = split_with_chunks("Sure, here it is.[PLAN]# Outline\n1. Intro", 5);
        assert_eq!(chat, "Sure, here it is.");
        assert_eq!(plan, "# Outline\n1. Intro");
    }

    #[test]
    fn chat_marker_is_stripped() {
        let (chat, plan) = split_with_chunks("[REPLY]Here is my answer.", 3);
        assert_eq!(chat, "Here is my answer.");
        assert_eq!(plan, "");
    }

    #[test]
    fn switches_back_and_forth() {
        let source = "[REPLY]answer[PLAN]plan A[REPLY]more answer[PLAN]plan B";
        let (chat, plan) = split_with_chunks(source, 2);
        assert_eq!(chat, "answermore answer");
        assert_eq!(plan, "plan Aplan B");
    }

    #[test]
    fn correct_under_every_chunking() {
        let source = "intro text [REPLY] the reply body [PLAN]## Section\npoint one";
        let expected = split_with_chunks(source, source.len());
        for chunk_size in 1..=source.len() {
            let got = split_with_chunks(source, chunk_size);
            assert_eq!(got, expected, "chunk_size = {}", chunk_size);
        }
    }

    #[test]
    fn markers_never_leak() {
        let source = "a[PLAN]b[REPLY]c[PLAN]d";
        for chunk_size in 1..=source.len() {
            let (chat, plan) = split_with_chunks(source, chunk_size);
            assert!(!chat.contains(CHAT) && !chat.contains(PLAN));
            assert!(!plan.contains(CHAT) && !plan.contains(PLAN));
        }
    }

    #[test]
    fn marker_split_across_chunks() {
        let mut splitter = StreamSplitter::new(CHAT, PLAN);
        let mut emitted = Vec::new();
        emitted.extend(splitter.push("hello [PL"));
        emitted.extend(splitter.push("AN]outline"));
        if let Some(last) = splitter.finish() {
            emitted.push(last);
        }
        let plan: String = emitted
            .iter()
            .filter(|(c, _)| *c == Channel::Plan)
            .map(|(_, t)| t.as_str())
            .collect();
        let chat: String = emitted
            .iter()
            .filter(|(c, _)| *c == Channel::Chat)
            .map(|(_, t)| t.as_str())
            .collect();
        assert_eq!(chat, "hello ");
        assert_eq!(plan, "outline");
    }

    #[test]
    fn partial_marker_at_end_is_flushed_verbatim() {
        let mut splitter = StreamSplitter::new(CHAT, PLAN);
        let _ = splitter.push("text [PLA");
        let (channel, tail) = splitter.finish().unwrap();
        assert_eq!(channel, Channel::Chat);
        assert!(tail.ends_with("[PLA"));
    }

    #[test]
    fn multibyte_markers() {
        let mut splitter = StreamSplitter::new("【回答】", "【计划】");
        let mut plan = String::new();
        let mut chat = String::new();
        for chunk in ["你好", "【计", "划】第一", "章"] {
            for (channel, text) in splitter.push(chunk) {
                match channel {
                    Channel::Chat => chat.push_str(&text),
                    Channel::Plan => plan.push_str(&text),
                }
            }
        }
        if let Some((channel, text)) = splitter.finish() {
            match channel {
                Channel::Chat => chat.push_str(&text),
                Channel::Plan => plan.push_str(&text),
            }
        }
        assert_eq!(chat, "你好");
        assert_eq!(plan, "第一章");
    }

    #[test]
    fn fragments_emitted_incrementally() {
        // A long marker-free stream must not be held until finish().
        let mut splitter = StreamSplitter::new(CHAT, PLAN);
        let emitted = splitter.push("a long stretch of text with no markers at all");
        assert!(!emitted.is_empty());
    }
}
