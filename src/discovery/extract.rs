//! Per-File Extraction
//!
//! Reads each ranked file and asks the gateway what it reveals about
//! the agent. Extractions run with a bounded fan-out of five; a file
//! that cannot be read or understood becomes an empty extraction with
//! a low-confidence evidence entry, never a pipeline failure.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::types::{
    ChatMessage, DiscoveredTool, Evidence, EvidenceKind, GenerateRequest, LlmGateway, ModelInfo,
};

use super::files::FileReader;
use super::ranking::{Priority, RankedFile};

pub const MAX_EXTRACT_FILES: usize = 20;
pub const EXTRACT_CONCURRENCY: usize = 5;
pub const MAX_CONTENT_CHARS: usize = 15_000;

const TRUNCATION_MARKER: &str = "\n... [content truncated]";

/// What one file contributed to the profile.
#[derive(Clone, Debug, Default)]
pub struct FileExtraction {
    pub path: String,
    pub system_prompt: Option<String>,
    pub tools: Vec<DiscoveredTool>,
    pub constraints: Vec<String>,
    pub model_config: Option<ModelInfo>,
    pub domain: Option<String>,
    pub findings: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractionDoc {
    system_prompt: Option<String>,
    #[serde(default)]
    tools: Vec<ToolDoc>,
    #[serde(default)]
    constraints: Vec<String>,
    model_config: Option<ModelInfo>,
    domain: Option<String>,
    #[serde(default)]
    findings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ToolDoc {
    name: String,
    #[serde(default)]
    description: String,
    parameters: Option<serde_json::Value>,
}

fn extraction_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "systemPrompt": {"type": ["string", "null"]},
            "tools": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "description": {"type": "string"},
                        "parameters": {}
                    },
                    "required": ["name"]
                }
            },
            "constraints": {"type": "array", "items": {"type": "string"}},
            "modelConfig": {
                "type": ["object", "null"],
                "properties": {
                    "provider": {"type": ["string", "null"]},
                    "model": {"type": ["string", "null"]}
                }
            },
            "domain": {"type": ["string", "null"]},
            "findings": {"type": "array", "items": {"type": "string"}}
        }
    })
}

/// Truncate file content for the prompt, marking the cut explicitly.
pub fn truncate_content(content: &str) -> String {
    if content.len() <= MAX_CONTENT_CHARS {
        return content.to_string();
    }
    let mut cut = MAX_CONTENT_CHARS;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &content[..cut], TRUNCATION_MARKER)
}

fn failure_extraction(path: &str, reason: String) -> (FileExtraction, Vec<Evidence>) {
    let extraction = FileExtraction { path: path.to_string(), ..Default::default() };
    let evidence = vec![Evidence {
        kind: EvidenceKind::Failure,
        source: path.to_string(),
        finding: reason,
        confidence: 0.2,
    }];
    (extraction, evidence)
}

async fn extract_one(
    gateway: Arc<dyn LlmGateway>,
    reader: Arc<dyn FileReader>,
    file: RankedFile,
) -> (FileExtraction, Vec<Evidence>) {
    let content = match reader.read_file(&file.path).await {
        Ok(content) => truncate_content(&content),
        Err(err) => return failure_extraction(&file.path, format!("unreadable: {}", err)),
    };

    let request = GenerateRequest {
        messages: vec![
            ChatMessage::system(
                "You extract agent-defining facts from source files. Report only what \
                 the file explicitly shows; do not infer beyond the code.",
            ),
            ChatMessage::user(format!(
                "File: {} (ranked {:?}: {})\n\nContent:\n{}\n\nReply with JSON: \
                 {{\"systemPrompt\", \"tools\": [{{\"name\", \"description\", \
                 \"parameters\"}}], \"constraints\", \"modelConfig\": {{\"provider\", \
                 \"model\"}}, \"domain\", \"findings\"}}.",
                file.path, file.priority, file.reason, content
            )),
        ],
        output_schema: Some(extraction_schema()),
        temperature: Some(0.0),
        max_tokens: Some(2048),
    };

    let reply = match gateway.generate(request).await {
        Ok(reply) => reply,
        Err(err) => {
            return failure_extraction(&file.path, format!("extraction call failed: {}", err))
        }
    };

    let Some(parsed) = reply.parsed else {
        return failure_extraction(&file.path, "extraction reply did not match schema".to_string());
    };
    let doc: ExtractionDoc = match serde_json::from_value(parsed) {
        Ok(doc) => doc,
        Err(err) => {
            return failure_extraction(&file.path, format!("extraction shape mismatch: {}", err))
        }
    };

    let path = file.path.clone();
    let tools = doc
        .tools
        .into_iter()
        .map(|t| DiscoveredTool {
            name: t.name,
            description: t.description,
            parameters: t.parameters,
            citation: path.clone(),
        })
        .collect();

    let mut evidence: Vec<Evidence> = doc
        .findings
        .iter()
        .map(|finding| Evidence {
            kind: EvidenceKind::Code,
            source: path.clone(),
            finding: finding.clone(),
            confidence: 0.7,
        })
        .collect();
    if let Some(prompt) = &doc.system_prompt {
        if !prompt.trim().is_empty() {
            evidence.push(Evidence {
                kind: EvidenceKind::SystemPrompt,
                source: path.clone(),
                finding: "verbatim system prompt found".to_string(),
                confidence: 0.9,
            });
        }
    }

    let extraction = FileExtraction {
        path,
        system_prompt: doc.system_prompt.filter(|p| !p.trim().is_empty()),
        tools,
        constraints: doc.constraints,
        model_config: doc.model_config,
        domain: doc.domain,
        findings: doc.findings,
    };

    (extraction, evidence)
}

/// Extract the top high+medium ranked files with a fan-out of five.
/// Results come back in rank order.
pub async fn extract_files(
    gateway: Arc<dyn LlmGateway>,
    reader: Arc<dyn FileReader>,
    ranked: &[RankedFile],
) -> (Vec<FileExtraction>, Vec<Evidence>) {
    let selected: Vec<RankedFile> = ranked
        .iter()
        .filter(|f| matches!(f.priority, Priority::High | Priority::Medium))
        .take(MAX_EXTRACT_FILES)
        .cloned()
        .collect();

    debug!("extracting {} ranked files", selected.len());

    let semaphore = Arc::new(Semaphore::new(EXTRACT_CONCURRENCY));
    let mut handles = Vec::with_capacity(selected.len());

    for file in selected {
        let gateway = Arc::clone(&gateway);
        let reader = Arc::clone(&reader);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("extraction semaphore is never closed");
            extract_one(gateway, reader, file).await
        }));
    }

    let mut extractions = Vec::with_capacity(handles.len());
    let mut evidence = Vec::new();
    for handle in handles {
        match handle.await {
            Ok((extraction, mut file_evidence)) => {
                extractions.push(extraction);
                evidence.append(&mut file_evidence);
            }
            Err(err) => {
                evidence.push(Evidence {
                    kind: EvidenceKind::Failure,
                    source: "extraction".to_string(),
                    finding: format!("extraction task failed: {}", err),
                    confidence: 0.2,
                });
            }
        }
    }

    (extractions, evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenerateResponse, TokenUsage};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedReader;

    #[async_trait]
    impl FileReader for FixedReader {
        async fn list_files(&self) -> Result<Vec<String>> {
            Ok(vec!["src/agent.ts".to_string(), "src/missing.ts".to_string()])
        }

        async fn read_file(&self, path: &str) -> Result<String> {
            if path == "src/missing.ts" {
                anyhow::bail!("no such file")
            }
            Ok("export const SYSTEM = 'You are a support agent';".to_string())
        }
    }

    struct ExtractionGateway {
        concurrent: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmGateway for ExtractionGateway {
        async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);

            let text = "{\"systemPrompt\": \"You are a support agent\", \
                        \"tools\": [{\"name\": \"lookup_order\", \"description\": \"find orders\"}], \
                        \"constraints\": [\"never reveal PII\"], \
                        \"findings\": [\"defines the system prompt\"]}"
                .to_string();
            let parsed = request
                .output_schema
                .as_ref()
                .and_then(|s| crate::gateway::structured::decode(&text, s));
            Ok(GenerateResponse { text, parsed, usage: TokenUsage::default() })
        }
    }

    fn ranked(path: &str) -> RankedFile {
        RankedFile {
            path: path.to_string(),
            reason: "test".to_string(),
            priority: Priority::High,
        }
    }

    #[test]
    fn test_truncate_content_marks_cut() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 100);
        let truncated = truncate_content(&long);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert!(truncated.len() < long.len());

        let short = "short file";
        assert_eq!(truncate_content(short), short);
    }

    #[tokio::test]
    async fn test_extract_collects_tools_and_evidence() {
        let gateway = Arc::new(ExtractionGateway {
            concurrent: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        });
        let reader = Arc::new(FixedReader);

        let (extractions, evidence) =
            extract_files(gateway, reader, &[ranked("src/agent.ts")]).await;

        assert_eq!(extractions.len(), 1);
        assert_eq!(extractions[0].tools[0].name, "lookup_order");
        assert_eq!(extractions[0].tools[0].citation, "src/agent.ts");
        assert!(evidence.iter().any(|e| e.kind == EvidenceKind::SystemPrompt));
    }

    #[tokio::test]
    async fn test_unreadable_file_becomes_empty_extraction() {
        let gateway = Arc::new(ExtractionGateway {
            concurrent: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        });
        let reader = Arc::new(FixedReader);

        let (extractions, evidence) =
            extract_files(gateway, reader, &[ranked("src/missing.ts")]).await;

        assert_eq!(extractions.len(), 1);
        assert!(extractions[0].tools.is_empty());
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].kind, EvidenceKind::Failure);
        assert_eq!(evidence[0].confidence, 0.2);
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        let peak = Arc::new(AtomicUsize::new(0));
        let gateway = Arc::new(ExtractionGateway {
            concurrent: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        });
        let reader = Arc::new(FixedReader);

        let many: Vec<RankedFile> = (0..MAX_EXTRACT_FILES).map(|_| ranked("src/agent.ts")).collect();
        let (extractions, _) = extract_files(gateway, reader, &many).await;

        assert_eq!(extractions.len(), MAX_EXTRACT_FILES);
        assert!(peak.load(Ordering::SeqCst) <= EXTRACT_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_low_priority_files_are_skipped() {
        let gateway = Arc::new(ExtractionGateway {
            concurrent: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        });
        let reader = Arc::new(FixedReader);

        let mut low = ranked("src/agent.ts");
        low.priority = Priority::Low;
        let (extractions, _) = extract_files(gateway, reader, &[low]).await;
        assert!(extractions.is_empty());
    }
}
