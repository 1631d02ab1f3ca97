//! Idea Generator
//!
//! Builds short animation ideas ("mirrored bouncing sparks") from a tagged
//! vocabulary. Vocabulary files hold one `word:pos` entry per line, where
//! `pos` is `v` (verb), `n` (noun) or `a` (adjective). Blank lines and `#`
//! comments are ignored.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use thiserror::Error;

/// Minimum verbs and nouns a vocabulary must provide
pub const MIN_WORDS_PER_CLASS: usize = 5;

/// Vocabulary used when no file is configured
pub const BUILTIN_VOCABULARY: &str = "\
# verbs
bounce:v
fall:v
spin:v
drift:v
pulse:v
scroll:v
flicker:v
chase:v
orbit:v
ripple:v
sweep:v
zigzag:v
# nouns
rain:n
sparks:n
stars:n
waves:n
comet:n
snow:n
bubbles:n
fireflies:n
pendulum:n
lightning:n
pixels:n
tide:n
# adjectives
mirrored:a
gentle:a
chaotic:a
tiny:a
glowing:a
twin:a
cascading:a
restless:a
";

/// Errors loading a vocabulary
#[derive(Debug, Error)]
pub enum IdeaError {
    /// Vocabulary file could not be read
    #[error("Failed to read vocabulary {}: {source}", path.display())]
    Read {
        /// File attempted
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Not enough words of a required class
    #[error("Only {found} {class} found (need {MIN_WORDS_PER_CLASS}+)")]
    TooFewWords {
        /// `verbs` or `nouns`
        class: &'static str,
        /// Distinct words found
        found: usize,
    },
}

/// Tagged word lists
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vocabulary {
    /// Base-form verbs
    pub verbs: Vec<String>,
    /// Nouns
    pub nouns: Vec<String>,
    /// Adjectives
    pub adjectives: Vec<String>,
    /// Lines without a recognised tag
    pub skipped: usize,
}

impl Vocabulary {
    /// Parse `word:pos` lines; duplicates are removed
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut verbs = BTreeSet::new();
        let mut nouns = BTreeSet::new();
        let mut adjectives = BTreeSet::new();
        let mut skipped = 0;

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((word, tag)) = line.split_once(':') else {
                skipped += 1;
                continue;
            };
            let word = word.trim();
            if word.is_empty() {
                skipped += 1;
                continue;
            }
            match tag.trim().to_ascii_lowercase().as_str() {
                "v" => verbs.insert(word.to_string()),
                "n" => nouns.insert(word.to_string()),
                "a" => adjectives.insert(word.to_string()),
                _ => {
                    skipped += 1;
                    continue;
                }
            };
        }

        Self {
            verbs: verbs.into_iter().collect(),
            nouns: nouns.into_iter().collect(),
            adjectives: adjectives.into_iter().collect(),
            skipped,
        }
    }

    fn check(&self) -> Result<(), IdeaError> {
        if self.verbs.len() < MIN_WORDS_PER_CLASS {
            return Err(IdeaError::TooFewWords {
                class: "verbs",
                found: self.verbs.len(),
            });
        }
        if self.nouns.len() < MIN_WORDS_PER_CLASS {
            return Err(IdeaError::TooFewWords {
                class: "nouns",
                found: self.nouns.len(),
            });
        }
        Ok(())
    }
}

/// `-ing` form of an English verb
#[must_use]
pub fn present_participle(verb: &str) -> String {
    let lower = verb.to_ascii_lowercase();
    if lower.ends_with("ing") {
        return verb.to_string();
    }
    if let Some(stem) = verb.strip_suffix("ie") {
        return format!("{stem}ying");
    }
    if lower.ends_with('e') && !lower.ends_with("ee") && !lower.ends_with("ye") && lower.len() > 2 {
        return format!("{}ing", &verb[..verb.len() - 1]);
    }

    // Short consonant-vowel-consonant endings double: spin, hop
    let chars: Vec<char> = lower.chars().collect();
    let is_vowel = |c: char| "aeiou".contains(c);
    if let [.., a, b, c] = *chars.as_slice() {
        if chars.len() <= 4 && !is_vowel(a) && is_vowel(b) && !is_vowel(c) && !"wxy".contains(c) {
            return format!("{verb}{c}ing");
        }
    }
    format!("{verb}ing")
}

/// Random phrase builder over a [`Vocabulary`]
#[derive(Clone, Debug)]
pub struct IdeaGenerator {
    vocabulary: Vocabulary,
}

impl IdeaGenerator {
    /// Generator over the built-in vocabulary
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            vocabulary: Vocabulary::parse(BUILTIN_VOCABULARY),
        }
    }

    /// Generator over an already-parsed vocabulary
    ///
    /// # Errors
    ///
    /// Returns [`IdeaError::TooFewWords`] when verbs or nouns are short.
    pub fn from_vocabulary(vocabulary: Vocabulary) -> Result<Self, IdeaError> {
        vocabulary.check()?;
        Ok(Self { vocabulary })
    }

    /// Load a vocabulary file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or has too few words.
    pub fn from_file(path: &Path) -> Result<Self, IdeaError> {
        let text = std::fs::read_to_string(path).map_err(|source| IdeaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let vocabulary = Vocabulary::parse(&text);
        if vocabulary.skipped > 0 {
            tracing::warn!(
                path = %path.display(),
                skipped = vocabulary.skipped,
                "Skipped vocabulary lines without a valid :pos tag"
            );
        }
        tracing::info!(
            verbs = vocabulary.verbs.len(),
            nouns = vocabulary.nouns.len(),
            adjectives = vocabulary.adjectives.len(),
            "Loaded vocabulary"
        );
        Self::from_vocabulary(vocabulary)
    }

    /// Generator from an optional file, falling back to the built-in list
    ///
    /// # Errors
    ///
    /// Propagates [`IdeaGenerator::from_file`] errors.
    pub fn from_optional_file(path: Option<&Path>) -> Result<Self, IdeaError> {
        path.map_or_else(|| Ok(Self::builtin()), Self::from_file)
    }

    /// Loaded vocabulary
    #[must_use]
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// A phrase of two to four words
    #[must_use]
    pub fn generate(&self) -> String {
        self.generate_with(&mut thread_rng(), 2, 4)
    }

    /// A phrase of `min_words..=max_words` words using the given RNG
    ///
    /// Always contains at least one noun.
    pub fn generate_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        min_words: usize,
        max_words: usize,
    ) -> String {
        let vocab = &self.vocabulary;
        let target = rng.gen_range(min_words.max(1)..=max_words.max(min_words).max(1));
        let mut words: Vec<String> = Vec::with_capacity(target + 1);

        let has_verb = rng.gen_bool(0.8);
        let adjective_count = WeightedIndex::new([0.3, 0.5, 0.2])
            .map(|dist| dist.sample(rng))
            .unwrap_or(1);

        for _ in 0..adjective_count.min(vocab.adjectives.len()) {
            if words.len() + 1 >= target {
                break;
            }
            if let Some(adjective) = vocab.adjectives.choose(rng) {
                if !words.contains(adjective) {
                    words.push(adjective.clone());
                }
            }
        }

        if has_verb && words.len() + 1 < target {
            if let Some(verb) = vocab.verbs.choose(rng) {
                words.push(present_participle(verb));
            }
        }

        let mut has_noun = false;
        let mut tries = 0;
        while words.len() < target && tries < target * 4 {
            tries += 1;
            if let Some(noun) = vocab.nouns.choose(rng) {
                if !words.contains(noun) {
                    words.push(noun.clone());
                    has_noun = true;
                }
            }
        }

        if !has_noun {
            if let Some(noun) = vocab.nouns.choose(rng) {
                words.push(noun.clone());
            }
        }

        words.join(" ")
    }
}

impl Default for IdeaGenerator {
    fn default() -> Self {
        Self::builtin()
    }
}
