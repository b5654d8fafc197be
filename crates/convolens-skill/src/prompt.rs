//! Skill prompt loading and assembly.
//!
//! Skill texts are natural-language contracts loaded verbatim from files;
//! the runtime never authors them. The incremental Skill is a composition of
//! the base contract plus required extension skills, each compacted to keep
//! the prompt bounded.

use crate::error::{Error, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

const SESSION_SKILL_FILE: &str = "diagnose-session.md";
const INCREMENTAL_SKILL_FILE: &str = "diagnose-incremental.md";
const INCREMENTAL_EXTENSION_SKILL_FILES: [&str; 1] = ["coach.md"];

const MAX_BASE_INCREMENTAL_SKILL_CHARS: usize = 1400;
const MAX_EXTENSION_SKILL_CHARS: usize = 180;

const TRUNCATION_NOTE: &str = "\n...（运行时已截断，仅保留关键约束）";

/// Fixed guardrail: a single JSON object, no markdown, no prose.
pub fn runtime_system_prompt() -> &'static str {
    "你是 Skill 运行时执行器。\
     必须严格遵循用户提供的 Skill 文本。\
     仅输出一个 JSON object。\
     不要输出 markdown、解释或额外前后缀。"
}

/// Build the provider-agnostic user prompt from an external Skill and an
/// input payload (compact JSON).
pub fn build_skill_user_prompt(
    skill_prompt: &str,
    input_name: &str,
    input_payload: &Value,
    output_schema: &str,
) -> String {
    let compact_input = serde_json::to_string(input_payload).unwrap_or_else(|_| "{}".to_string());
    format!(
        "请严格执行以下 Skill，按其约束生成结果。\n\
         输出必须是单个 JSON object。\n\n\
         [Skill]\n{}\n\n\
         [{}]\n{}\n\n\
         [TargetSchema]\n{}\n",
        skill_prompt, input_name, compact_input, output_schema
    )
}

/// Keep essential non-empty lines while limiting prompt size (in chars).
pub fn compact_skill_text(text: &str, limit_chars: usize) -> String {
    if text.is_empty() {
        return String::new();
    }
    let compact = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if compact.chars().count() <= limit_chars {
        return compact;
    }
    let truncated: String = compact.chars().take(limit_chars).collect();
    format!("{}{}", truncated.trim_end(), TRUNCATION_NOTE)
}

fn load_skill_file(skills_dir: &Path, filename: &str) -> Result<String> {
    let path = skills_dir.join(filename);
    if !path.is_file() {
        return Err(Error::Invocation(format!(
            "skill prompt missing: {}",
            path.display()
        )));
    }
    Ok(fs::read_to_string(path)?)
}

/// Load the per-session diagnosis skill text.
pub fn load_session_skill(skills_dir: &Path) -> Result<String> {
    load_skill_file(skills_dir, SESSION_SKILL_FILE)
}

/// Load the base incremental skill plus required extension skills.
///
/// Returns the composite prompt and the list of skill files used. Any
/// missing extension is a fatal configuration error.
pub fn load_incremental_skill_bundle(skills_dir: &Path) -> Result<(String, Vec<String>)> {
    let mut used_files: Vec<String> = vec![INCREMENTAL_SKILL_FILE.to_string()];
    let mut missing_files: Vec<String> = Vec::new();

    let base_prompt = compact_skill_text(
        load_skill_file(skills_dir, INCREMENTAL_SKILL_FILE)?.trim(),
        MAX_BASE_INCREMENTAL_SKILL_CHARS,
    );

    let mut extension_sections: Vec<String> = Vec::new();
    for filename in INCREMENTAL_EXTENSION_SKILL_FILES {
        let path = skills_dir.join(filename);
        if !path.is_file() {
            missing_files.push(path.display().to_string());
            continue;
        }
        used_files.push(filename.to_string());
        let raw_text = fs::read_to_string(&path)?;
        let compact_text = compact_skill_text(raw_text.trim(), MAX_EXTENSION_SKILL_CHARS);
        extension_sections.push(format!("## 扩展技能约束（{}）\n{}", filename, compact_text));
    }

    if !missing_files.is_empty() {
        return Err(Error::Invocation(format!(
            "required incremental extension skill(s) missing: {}",
            missing_files.join(", ")
        )));
    }

    let mut parts = vec![
        base_prompt,
        "## 组合执行约束".to_string(),
        "在满足 diagnose-incremental 主契约的前提下，必须同时遵循以下扩展技能约束：".to_string(),
    ];
    parts.extend(extension_sections);
    Ok((parts.join("\n\n").trim().to_string(), used_files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn user_prompt_has_labeled_sections() {
        let prompt = build_skill_user_prompt(
            "输出 SessionMechanismV1 JSON。",
            "SessionDigestV1",
            &json!({"session_id": "s-1"}),
            "SessionMechanismV1",
        );
        assert!(prompt.contains("[Skill]\n输出 SessionMechanismV1 JSON。"));
        assert!(prompt.contains("[SessionDigestV1]\n{\"session_id\":\"s-1\"}"));
        assert!(prompt.contains("[TargetSchema]\nSessionMechanismV1"));
    }

    #[test]
    fn compaction_drops_blank_lines_and_truncates() {
        let text = "line one\n\n   \nline two   \n";
        assert_eq!(compact_skill_text(text, 100), "line one\nline two");

        let long = "约束".repeat(200);
        let compacted = compact_skill_text(&long, 10);
        assert!(compacted.starts_with(&"约束".repeat(5)));
        assert!(compacted.contains("运行时已截断"));
    }

    #[test]
    fn bundle_requires_all_files() {
        let temp = TempDir::new().unwrap();
        let err = load_incremental_skill_bundle(temp.path()).unwrap_err();
        assert!(err.to_string().contains("skill prompt missing"));

        fs::write(temp.path().join("diagnose-incremental.md"), "输出 IncrementalMechanismV1 JSON。").unwrap();
        let err = load_incremental_skill_bundle(temp.path()).unwrap_err();
        assert!(err.to_string().contains("required incremental extension skill(s) missing"));

        fs::write(temp.path().join("coach.md"), "教练扩展约束。").unwrap();
        let (prompt, files) = load_incremental_skill_bundle(temp.path()).unwrap();
        assert!(prompt.contains("输出 IncrementalMechanismV1 JSON。"));
        assert!(prompt.contains("## 扩展技能约束（coach.md）"));
        assert!(prompt.contains("教练扩展约束。"));
        assert_eq!(files, vec!["diagnose-incremental.md".to_string(), "coach.md".to_string()]);
    }
}
