use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    config::BrelloConfig,
    error::{BrelloError, Result},
};

pub const DEFAULT_PACKAGE_DIR: &str = "brello_ei_0_hf";
pub const CONFIG_FILE_NAME: &str = "brello_config.json";

const MODEL_CARD: &str = r#"---
language:
- en
license: mit
tags:
- conversational
- emotional-intelligence
- brello-ei
- epic-systems
- ai-assistant
- empathy
pipeline_tag: text-generation
---

# Brello EI 0 - Emotional Intelligence AI

**Created by Epic Systems | Engineered by Rehan Temkar**

A conversational model tuned for emotional intelligence and empathetic
responses. Brello EI 0 is part of the Brello AI family.

## Features

- **Emotional Intelligence**: empathetic, understanding responses
- **Conversational**: natural dialogue flow, with optional multi-turn history
- **Local Operation**: runs fully offline once the weights are cached
- **Memory Efficient**: optional 8-bit and 4-bit quantized weights

## Quick Start

```bash
brello chat --model {model_id}
```

```rust
use brello_ei::{GenerationOverrides, ResponseGenerator};

let mut generator = ResponseGenerator::builder()
    .with_model_id("{model_id}")
    .load()
    .await?;
let reply = generator.generate_response(
    "I'm feeling really stressed about my presentation tomorrow.",
    &GenerationOverrides::default(),
)?;
println!("{}", reply);
```

## Configuration

### Model Parameters
- `model_id`: hub repository or local directory (default: "{model_id}")
- `device`: `cpu`, `cuda`, `cuda:N` or `metal`; detected when omitted
- `quantization`: `none`, `int8` or `int4`

### Generation Parameters
- `temperature`: sampling temperature (default: {temperature})
- `top_p`: nucleus sampling threshold (default: {top_p})
- `max_length`: maximum conversation length, history included (default: {max_length})
- `min_length`: minimum total length (default: {min_length})
- `max_new_tokens`: maximum new tokens per reply (default: {max_new_tokens})

The full default configuration ships as `brello_config.json`.

## License

This project is licensed under the MIT License - see the LICENSE file for details.

---

**Brello EI 0** - Bringing emotional intelligence to AI conversations
"#;

const LICENSE_TEXT: &str = r#"MIT License

Copyright (c) 2024 Epic Systems

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
"#;

const UPLOAD_GUIDE: &str = r#"# Uploading Brello EI 0 to Hugging Face

## Quick Upload Steps

1. **Login to Hugging Face**:
   ```bash
   pip install huggingface_hub
   huggingface-cli login
   ```

2. **Upload with the bundled tool** (creates the repository first):
   ```bash
   brello upload --dir brello_ei_0_hf
   ```

3. **Or by hand**:
   ```bash
   huggingface-cli repo create brello-ei-0 --type model
   huggingface-cli upload your-username/brello-ei-0 brello_ei_0_hf/ --include "*.py,*.md,*.txt,*.json"
   ```

## Adding a Logo

1. Create a logo image (400x400px PNG recommended, under 1MB)
2. Name it `logo.png`
3. Upload it:
   ```bash
   huggingface-cli upload your-username/brello-ei-0 logo.png
   ```

The logo appears on the model page, in search results and in model cards.
"#;

/// Files written by [`create_package`].
#[derive(Debug, Clone, Default)]
pub struct PackageReport {
    pub dir: PathBuf,
    pub copied: Vec<PathBuf>,
    pub generated: Vec<PathBuf>,
    /// Requested files that did not exist
    pub skipped: Vec<PathBuf>,
}

/// Model card with the configured model and generation defaults filled in.
pub fn render_model_card(config: &BrelloConfig) -> String {
    let generation = &config.generation;
    MODEL_CARD
        .replace("{model_id}", &config.model.model_id)
        .replace("{temperature}", &generation.temperature.to_string())
        .replace("{top_p}", &generation.top_p.to_string())
        .replace("{max_length}", &generation.max_length.to_string())
        .replace("{min_length}", &generation.min_length.to_string())
        .replace("{max_new_tokens}", &generation.max_new_tokens.to_string())
}

/// Recreates `dir`, copies `files` into it and writes the generated
/// documents.
pub fn create_package(dir: &Path, files: &[PathBuf], config: &BrelloConfig) -> Result<PackageReport> {
    if dir.file_name().is_none() {
        return Err(BrelloError::Publish(format!(
            "refusing to use '{}' as a package directory",
            dir.display()
        )));
    }

    let mut report = PackageReport {
        dir: dir.to_path_buf(),
        ..Default::default()
    };

    // Sources are read before the wipe; they may live inside `dir`.
    let mut staged = Vec::with_capacity(files.len());
    for file in files {
        let Some(name) = file.file_name() else {
            report.skipped.push(file.clone());
            continue;
        };
        if !file.is_file() {
            warn!(file = %file.display(), "Package source missing, skipping");
            report.skipped.push(file.clone());
            continue;
        }
        staged.push((dir.join(name), std::fs::read(file)?));
    }

    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;

    for (target, contents) in staged {
        std::fs::write(&target, contents)?;
        report.copied.push(target);
    }

    let documents = [
        ("README.md", render_model_card(config)),
        ("LICENSE", LICENSE_TEXT.to_string()),
        ("UPLOAD_GUIDE.md", UPLOAD_GUIDE.to_string()),
        (CONFIG_FILE_NAME, serde_json::to_string_pretty(config)?),
    ];
    for (name, content) in documents {
        let path = dir.join(name);
        std::fs::write(&path, content)?;
        report.generated.push(path);
    }

    info!(
        dir = %dir.display(),
        copied = report.copied.len(),
        skipped = report.skipped.len(),
        "Package created"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_model_card_front_matter() {
        let card = render_model_card(&BrelloConfig::default());
        assert!(card.starts_with("---\nlanguage:\n- en\nlicense: mit\n"));
        assert!(card.contains("pipeline_tag: text-generation\n---"));
        assert!(card.contains("sampling temperature (default: 0.7)"));
        assert!(card.contains("(default: 256)"));
        assert!(!card.contains("{model_id}"));
    }

    #[test]
    fn test_create_package() {
        let workspace = tempfile::tempdir().unwrap();
        let source = workspace.path().join("notes.txt");
        std::fs::write(&source, "notes").unwrap();
        let missing = workspace.path().join("missing.md");

        let dir = workspace.path().join("pkg");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("stale.txt"), "old").unwrap();

        let report = create_package(&dir, &[source, missing.clone()], &BrelloConfig::default()).unwrap();

        assert_eq!(report.copied, vec![dir.join("notes.txt")]);
        assert_eq!(report.skipped, vec![missing]);
        assert_eq!(report.generated.len(), 4);
        assert!(!dir.join("stale.txt").exists());
        assert!(std::fs::read_to_string(dir.join("LICENSE")).unwrap().starts_with("MIT License"));

        let saved: BrelloConfig =
            serde_json::from_str(&std::fs::read_to_string(dir.join(CONFIG_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(saved.generation, BrelloConfig::default().generation);
    }

    #[test]
    fn test_sources_inside_package_dir_survive_rebuild() {
        let workspace = tempfile::tempdir().unwrap();
        let dir = workspace.path().join("pkg");
        std::fs::create_dir(&dir).unwrap();
        let inside = dir.join("notes.md");
        std::fs::write(&inside, "keep me").unwrap();
        std::fs::write(dir.join("stale.txt"), "old").unwrap();

        let report = create_package(&dir, &[inside.clone()], &BrelloConfig::default()).unwrap();

        assert_eq!(report.copied, vec![inside.clone()]);
        assert!(report.skipped.is_empty());
        assert_eq!(std::fs::read_to_string(&inside).unwrap(), "keep me");
        assert!(!dir.join("stale.txt").exists());
    }

    #[test]
    fn test_rejects_unnamed_directory() {
        let err = create_package(Path::new("/"), &[], &BrelloConfig::default()).unwrap_err();
        assert!(matches!(err, BrelloError::Publish(_)));
    }
}
