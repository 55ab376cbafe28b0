//! AI summary providers behind the `quill_core::summary::Summarizer` contract.

pub mod openai;
