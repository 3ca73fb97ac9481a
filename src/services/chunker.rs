/// Separators tried, in order, when splitting item text for embedding
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Recursive-character text splitter
///
/// Splits text on the first separator that occurs, recursing into oversized
/// fragments with the remaining separators, hard-splitting whatever is still
/// too long, then merges fragments back into chunks of at most `chunk_size`
/// characters where each chunk starts with up to `chunk_overlap` trailing
/// characters of the previous one. An empty separator splits into single
/// characters. Lengths are counted in characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursiveCharacterSplitter {
    separators: Vec<String>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveCharacterSplitter {
    pub fn new<S: AsRef<str>>(separators: &[S], chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            separators: separators.iter().map(|s| s.as_ref().to_string()).collect(),
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    /// Splitter with [`DEFAULT_SEPARATORS`]
    pub fn with_defaults(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self::new(&DEFAULT_SEPARATORS, chunk_size, chunk_overlap)
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let fragments = self.recursive_split(text, &self.separators);
        self.merge_with_overlap(fragments)
    }

    fn recursive_split(&self, text: &str, separators: &[String]) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }
        let Some((separator, rest)) = separators.split_first() else {
            return self.hard_split(text);
        };

        let parts: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator.as_str()).map(str::to_string).collect()
        };
        if parts.len() <= 1 {
            return self.recursive_split(text, rest);
        }

        parts
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .flat_map(|part| self.recursive_split(part, rest))
            .collect()
    }

    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_size)
            .map(|window| window.iter().collect())
            .collect()
    }

    fn merge_with_overlap(&self, fragments: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<char> = Vec::new();

        for fragment in fragments {
            let fragment: Vec<char> = fragment.chars().collect();
            if !current.is_empty() && current.len() + fragment.len() > self.chunk_size {
                chunks.push(current.iter().collect::<String>());

                // Seed with the chunk's tail, shortened so the next chunk
                // stays within chunk_size
                let room = self.chunk_size.saturating_sub(fragment.len());
                let overlap = self.chunk_overlap.min(room);
                current = if overlap > 0 && overlap <= current.len() {
                    current[current.len() - overlap..].to_vec()
                } else {
                    Vec::new()
                };
            }
            current.extend(fragment);
        }

        if !current.is_empty() {
            chunks.push(current.into_iter().collect());
        }
        chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
