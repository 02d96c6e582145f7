use serde::Serialize;

/// A selectable model: display label and the id sent to the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelEntry {
    pub label: &'static str,
    pub id: &'static str,
}

pub const MODELS: &[ModelEntry] = &[
    ModelEntry { label: "LLaMA 3.3 70B (Versatile)", id: "llama-3.3-70b-versatile" },
    ModelEntry { label: "LLaMA 3.1 8B (Instant)", id: "llama-3.1-8b-instant" },
    ModelEntry { label: "LLaMA 3 70B", id: "llama3-70b-8192" },
    ModelEntry { label: "LLaMA 3 8B", id: "llama3-8b-8192" },
    ModelEntry { label: "Gemma 2 9B IT", id: "gemma2-9b-it" },
    ModelEntry { label: "Qwen QWQ 32B", id: "qwen-qwq-32b" },
    ModelEntry { label: "DeepSeek (LLaMA 70B Distilled)", id: "deepseek-r1-distill-llama-70b" },
    ModelEntry { label: "Allam 2 7B", id: "allam-2-7b" },
];

pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

pub fn find(id: &str) -> Option<&'static ModelEntry> {
    MODELS.iter().find(|entry| entry.id == id)
}

pub fn is_known(id: &str) -> bool {
    find(id).is_some()
}
