// Shared fixtures for unit tests: a word-level tokenizer written
// in Hugging Face JSON form, a tiny Llama configuration that runs
// in milliseconds on the ndarray backend, and a local model
// directory built from both.

use std::path::{Path, PathBuf};

use tokenizers::Tokenizer;

use crate::domain::record::InstructionRecord;
use crate::infra::{hub, weights::encode_f32};
use crate::ml::model::LlamaConfig;

pub type TestBackend         = burn::backend::NdArray;
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;

pub const PAD_ID: u32 = 0;
pub const BOS_ID: u32 = 1;
pub const EOS_ID: u32 = 2;

const WORDS: [&str; 24] = [
    "what", "is", "two", "plus", "four", "name", "a", "color", "red", "blue",
    "say", "hello", "world", "hi", "the", "sky", "answer", "yes", "no", "one",
    "three", "five", "six", "seven",
];

pub fn vocab_size() -> usize {
    4 + WORDS.len()
}

/// Writes `tokenizer.json` into `dir` and returns its path.
/// Single sequences get a leading <s>, like Llama tokenizers.
pub fn write_tokenizer(dir: &Path) -> PathBuf {
    let mut vocab = serde_json::json!({ "<pad>": 0, "<s>": 1, "</s>": 2, "<unk>": 3 });
    for (i, w) in WORDS.iter().enumerate() {
        vocab[*w] = serde_json::json!(4 + i);
    }

    let special = |id: u32, content: &str| serde_json::json!({
        "id": id, "content": content, "single_word": false, "lstrip": false,
        "rstrip": false, "normalized": false, "special": true
    });

    let json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            special(0, "<pad>"), special(1, "<s>"), special(2, "</s>"), special(3, "<unk>")
        ],
        "normalizer": { "type": "Lowercase" },
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                { "SpecialToken": { "id": "<s>", "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } }
            ],
            "pair": [
                { "SpecialToken": { "id": "<s>", "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } },
                { "Sequence": { "id": "B", "type_id": 1 } }
            ],
            "special_tokens": {
                "<s>": { "id": "<s>", "ids": [1], "tokens": ["<s>"] }
            }
        },
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "<unk>" }
    });

    let path = dir.join("tokenizer.json");
    std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();
    path
}

pub fn tokenizer(dir: &Path) -> Tokenizer {
    Tokenizer::from_file(write_tokenizer(dir)).unwrap()
}

pub fn tiny_config() -> LlamaConfig {
    LlamaConfig::new(vocab_size(), 16, 32, 2, 4, 2)
        .with_max_position_embeddings(64)
        .with_eos_token_id(EOS_ID)
}

pub fn records(n: usize) -> Vec<InstructionRecord> {
    let pool = [
        ("what is two plus two", "four"),
        ("name a color", "red"),
        ("say hello", "hello world"),
        ("what color is the sky", "blue"),
        ("is one plus one three", "no"),
    ];
    (0..n)
        .map(|i| {
            let (q, a) = pool[i % pool.len()];
            InstructionRecord::new(q, a)
        })
        .collect()
}

/// Lays out a hub-style snapshot of the tiny model in `dir`:
/// config.json, tokenizer.json and model.safetensors.
pub fn write_model_dir(dir: &Path) {
    let cfg = tiny_config();
    std::fs::write(dir.join(hub::CONFIG_FILE), serde_json::json!({
        "model_type": "llama",
        "vocab_size": cfg.vocab_size,
        "hidden_size": cfg.hidden_size,
        "intermediate_size": cfg.intermediate_size,
        "num_hidden_layers": cfg.num_hidden_layers,
        "num_attention_heads": cfg.num_attention_heads,
        "num_key_value_heads": cfg.num_key_value_heads,
        "max_position_embeddings": cfg.max_position_embeddings,
        "eos_token_id": EOS_ID,
    }).to_string()).unwrap();

    write_tokenizer(dir);

    let tensors: Vec<_> = cfg
        .weight_shapes()
        .into_iter()
        .map(|(name, shape)| {
            let n: usize = shape.iter().product();
            let fill = if name.contains("norm") { 1.0 } else { 0.02 };
            let values = (0..n).map(|i| if i % 3 == 0 { fill } else { -fill * 0.5 }).collect();
            (name, shape, values)
        })
        .collect();
    std::fs::write(dir.join(hub::WEIGHTS_FILE), encode_f32(&tensors).unwrap()).unwrap();
}
