//! # Vocabulary Registry
//!
//! Line-oriented vocabularies: one entry per line, the line index is the id.
//! The same format serves the token, slot-tag and intent vocabularies.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{NluError, Result};

pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const UNK_TOKEN: &str = "[UNK]";

/// Bidirectional entry <-> id mapping.
#[derive(Debug, Clone, Default)]
pub struct Vocab {
    word2id: HashMap<String, u32>,
    id2word: Vec<String>,
}

impl Vocab {
    /// Build a vocabulary from entries in id order.
    ///
    /// Duplicate entries keep their first id.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self::default();
        for entry in entries {
            let entry = entry.into();
            let id = vocab.id2word.len() as u32;
            vocab.word2id.entry(entry.clone()).or_insert(id);
            vocab.id2word.push(entry);
        }
        vocab
    }

    /// Read a vocabulary file. Missing or empty files are configuration errors.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| NluError::Vocab {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let vocab = Self::from_entries(content.lines().map(str::trim_end));
        if vocab.is_empty() {
            return Err(NluError::Vocab {
                path: path.to_path_buf(),
                reason: "file has no entries".into(),
            });
        }

        tracing::debug!(path = %path.display(), size = vocab.len(), "loaded vocabulary");
        Ok(vocab)
    }

    pub fn get_id(&self, word: &str) -> Option<u32> {
        self.word2id.get(word).copied()
    }

    /// Look up `word`, falling back to `fallback` when it is unknown.
    pub fn id_or(&self, word: &str, fallback: u32) -> u32 {
        self.get_id(word).unwrap_or(fallback)
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.id2word.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.id2word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2word.is_empty()
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.id2word.iter().map(String::as_str)
    }
}

/// Token vocabulary with its special ids resolved once at load time.
#[derive(Debug, Clone)]
pub struct TokenVocab {
    vocab: Vocab,
    cls_id: u32,
    sep_id: u32,
    unk_id: u32,
}

impl TokenVocab {
    /// Wrap a vocabulary, failing if `[CLS]`, `[SEP]` or `[UNK]` is absent.
    pub fn new(vocab: Vocab) -> Result<Self> {
        let special = |token: &str| {
            vocab
                .get_id(token)
                .ok_or_else(|| NluError::Config(format!("missing special token {token}")))
        };
        let cls_id = special(CLS_TOKEN)?;
        let sep_id = special(SEP_TOKEN)?;
        let unk_id = special(UNK_TOKEN)?;

        Ok(Self {
            vocab,
            cls_id,
            sep_id,
            unk_id,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let vocab = Vocab::from_file(path)?;
        Self::new(vocab).map_err(|err| match err {
            NluError::Config(reason) => NluError::Vocab {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Token id, or the `[UNK]` id for tokens outside the vocabulary.
    pub fn token_id(&self, token: &str) -> u32 {
        self.vocab.id_or(token, self.unk_id)
    }

    pub fn cls_id(&self) -> u32 {
        self.cls_id
    }

    pub fn sep_id(&self) -> u32 {
        self.sep_id
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn len(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }
}

/// The three vocabularies a featurizer and evaluator share.
#[derive(Debug, Clone)]
pub struct Vocabularies {
    pub tokens: TokenVocab,
    pub slots: Vocab,
    pub intents: Vocab,
}

impl Vocabularies {
    pub fn load<P: AsRef<Path>>(token_path: P, slot_path: P, intent_path: P) -> Result<Self> {
        let tokens = TokenVocab::from_file(token_path)?;
        let slots = Vocab::from_file(slot_path)?;
        let intents = Vocab::from_file(intent_path)?;
        tracing::info!(
            tokens = tokens.len(),
            slots = slots.len(),
            intents = intents.len(),
            "vocabularies loaded"
        );
        Ok(Self {
            tokens,
            slots,
            intents,
        })
    }

    pub fn num_slot_labels(&self) -> usize {
        self.slots.len()
    }

    pub fn num_intent_labels(&self) -> usize {
        self.intents.len()
    }
}
