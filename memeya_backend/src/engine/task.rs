//! Code generation engine.
//!
//! Drives the code backend through a running conversation and turns its
//! replies into [`CodeEdit`]s. Edits are fenced blocks tagged
//! `language::filepath`:
//!
//! ````text
//! ```js::src/App.js
//! console.log(1)
//! ```
//! ````
//!
//! A filepath of `SHELL` marks a shell command instead of a file write.

use std::collections::VecDeque;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::backend::{CodeBackend, Message, Usage};
use crate::error::{AgentError, Result};

pub const SHELL_FILEPATH: &str = "SHELL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEdit {
    pub language: String,
    pub filepath: String,
    pub content: String,
}

impl CodeEdit {
    pub fn is_shell(&self) -> bool {
        self.filepath == SHELL_FILEPATH
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub current_files: Option<String>,
    pub last_error: Option<String>,
    pub ux_feedback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub response_text: String,
    pub code_edits: Vec<CodeEdit>,
    pub usage: Usage,
}

pub struct TaskEngine {
    backend: Arc<dyn CodeBackend>,
    persona: String,
    knowledge_dir: PathBuf,
    max_tokens: u32,
    max_turns: usize,
    conversation: VecDeque<Message>,
}

impl TaskEngine {
    pub fn new(
        backend: Arc<dyn CodeBackend>,
        persona: String,
        knowledge_dir: impl Into<PathBuf>,
        max_tokens: u32,
        max_turns: usize,
    ) -> Self {
        Self {
            backend,
            persona,
            knowledge_dir: knowledge_dir.into(),
            max_tokens,
            // Whole user/assistant pairs, so history never opens on an assistant turn.
            max_turns: max_turns.max(2).next_multiple_of(2),
            conversation: VecDeque::new(),
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &Message> {
        self.conversation.iter()
    }

    pub fn history_len(&self) -> usize {
        self.conversation.len()
    }

    pub fn clear_history(&mut self) {
        tracing::info!(
            "Clearing task conversation ({} turns)",
            self.conversation.len()
        );
        self.conversation.clear();
    }

    pub async fn generate_code(&mut self, task: &str, context: &TaskContext) -> Result<Generation> {
        let system = self.build_system_prompt(context);

        self.conversation.push_back(Message::user(task));
        let messages: Vec<Message> = self.conversation.iter().cloned().collect();

        let completion = match self
            .backend
            .complete(&system, &messages, self.max_tokens)
            .await
        {
            Ok(completion) => completion,
            Err(error) => {
                // Don't leave a dangling user turn behind a failed call.
                self.conversation.pop_back();
                return Err(error);
            }
        };

        self.conversation
            .push_back(Message::assistant(completion.text.clone()));
        self.trim_history();

        let code_edits = parse_code_blocks(&completion.text);
        tracing::info!(
            "{} produced {} code edit(s) ({} in / {} out tokens)",
            self.backend.name(),
            code_edits.len(),
            completion.usage.input_tokens,
            completion.usage.output_tokens
        );

        Ok(Generation {
            response_text: completion.text,
            code_edits,
            usage: completion.usage,
        })
    }

    pub async fn fix_code(&mut self, error_text: &str, context: &TaskContext) -> Result<Generation> {
        let task = format!(
            "The last change failed with this error:\n\n```\n{}\n```\n\n\
             Find the root cause and fix it. Return only the files that need to change, \
             each in a ```language::filepath block.",
            error_text.trim()
        );
        let mut context = context.clone();
        context.last_error = Some(error_text.to_string());
        self.generate_code(&task, &context).await
    }

    pub async fn improve_ux(
        &mut self,
        feedback_text: &str,
        confidence_pct: u8,
        context: &TaskContext,
    ) -> Result<Generation> {
        let task = format!(
            "Community UX feedback ({}% confidence this reflects real users):\n\n{}\n\n\
             Improve the interface accordingly. Keep the change small and shippable, and \
             return each changed file in a ```language::filepath block.",
            confidence_pct.min(100),
            feedback_text.trim()
        );
        let mut context = context.clone();
        context.ux_feedback = Some(feedback_text.to_string());
        self.generate_code(&task, &context).await
    }

    pub fn build_system_prompt(&self, context: &TaskContext) -> String {
        let mut prompt = format!(
            "{}\n\n\
             ## Output format\n\
             Put every file you create or change in its own fenced block whose info string is \
             `language::relative/path` (for example ```js::src/App.js). Use `bash::SHELL` for \
             shell commands. Paths are relative to the project root.",
            self.persona.trim()
        );

        let knowledge = load_knowledge_base(&self.knowledge_dir);
        if !knowledge.is_empty() {
            prompt.push_str("\n\n## Knowledge Base\n");
            prompt.push_str(&knowledge);
        }

        if let Some(files) = context.current_files.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\n## Current Files\n");
            prompt.push_str(files.trim());
        }

        if let Some(error) = context.last_error.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\n## Last Error\n```\n");
            prompt.push_str(error.trim());
            prompt.push_str("\n```");
        }

        if let Some(feedback) = context.ux_feedback.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\n## UX Feedback\n");
            prompt.push_str(feedback.trim());
        }

        prompt
    }

    fn trim_history(&mut self) {
        while self.conversation.len() > self.max_turns {
            self.conversation.pop_front();
            self.conversation.pop_front();
        }
    }
}

/// Concatenate every `.md`/`.txt` file in `dir` (sorted by name). Missing dir → empty.
pub fn load_knowledge_base(dir: &Path) -> String {
    let Ok(entries) = fs::read_dir(dir) else {
        return String::new();
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("md") | Some("txt")
                )
        })
        .collect();
    paths.sort();

    let mut out = String::new();
    for path in paths {
        match fs::read_to_string(&path) {
            Ok(content) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                out.push_str(&format!("### {}\n{}\n\n", name, content.trim()));
            }
            Err(e) => tracing::warn!("Skipping knowledge file {:?}: {}", path, e),
        }
    }
    out.trim_end().to_string()
}

/// Extract `language::filepath` fenced blocks in the order they appear.
pub fn parse_code_blocks(text: &str) -> Vec<CodeEdit> {
    let Ok(re) = Regex::new(r"```([A-Za-z0-9_+.#-]+)::([^\s`]+)[^\n]*\n([\s\S]*?)```") else {
        return Vec::new();
    };

    re.captures_iter(text)
        .map(|caps| CodeEdit {
            language: caps[1].to_string(),
            filepath: caps[2].to_string(),
            content: caps[3].trim().to_string(),
        })
        .collect()
}

/// Resolve `filepath` under `base_dir`, rejecting absolute paths and any `..`
/// that would climb out of the base.
pub fn resolve_within(base_dir: &Path, filepath: &str) -> Result<PathBuf> {
    let relative = Path::new(filepath);
    let mut resolved = PathBuf::new();

    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(AgentError::PathEscape {
                        path: base_dir.join(relative),
                    });
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AgentError::PathEscape {
                    path: relative.to_path_buf(),
                });
            }
        }
    }

    if resolved.as_os_str().is_empty() {
        return Err(AgentError::PathEscape {
            path: base_dir.join(relative),
        });
    }

    let target = base_dir.join(resolved);
    ensure_no_symlink_escape(base_dir, &target)?;
    Ok(target)
}

/// The lexical check above cannot see symlinks already in the workspace.
/// Reject a target that is itself a symlink, and require the deepest existing
/// ancestor to canonicalize inside the base.
fn ensure_no_symlink_escape(base_dir: &Path, target: &Path) -> Result<()> {
    let Ok(canonical_base) = base_dir.canonicalize() else {
        // No base yet, so nothing below it exists either.
        return Ok(());
    };
    let escape = || AgentError::PathEscape {
        path: target.to_path_buf(),
    };

    if fs::symlink_metadata(target)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
    {
        return Err(escape());
    }

    let Some(existing) = target
        .ancestors()
        .find(|ancestor| fs::symlink_metadata(ancestor).is_ok())
    else {
        return Ok(());
    };
    let canonical = existing.canonicalize().map_err(|_| escape())?;
    if !canonical.starts_with(&canonical_base) {
        return Err(escape());
    }
    Ok(())
}

/// Write every non-shell edit under `base_dir` in emission order, returning the
/// relative paths written.
///
/// All paths are validated before anything is written, so one escaping path
/// rejects the whole batch.
pub fn write_code_to_files(edits: &[CodeEdit], base_dir: &Path) -> Result<Vec<String>> {
    let targets = edits
        .iter()
        .filter(|edit| !edit.is_shell())
        .map(|edit| resolve_within(base_dir, &edit.filepath).map(|path| (edit, path)))
        .collect::<Result<Vec<_>>>()?;

    let mut written = Vec::with_capacity(targets.len());
    for (edit, path) in targets {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &edit.content)?;
        tracing::debug!("Wrote {:?}", path);
        written.push(edit.filepath.clone());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Completion;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String>>>,
        seen: Mutex<Vec<(String, Vec<Message>)>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CodeBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            system: &str,
            messages: &[Message],
            _max_tokens: u32,
        ) -> Result<Completion> {
            self.seen
                .lock()
                .unwrap()
                .push((system.to_string(), messages.to_vec()));
            let text = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected backend call")?;
            Ok(Completion {
                text,
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            })
        }
    }

    fn engine(backend: Arc<ScriptedBackend>, knowledge_dir: &Path) -> TaskEngine {
        TaskEngine::new(backend, "You build things.".to_string(), knowledge_dir, 1024, 40)
    }

    #[test]
    fn parses_blocks_in_order_with_trimmed_content() {
        let reply = "Here you go.\n\
            ```js::a.js\n\n  const a = 1;\n\n```\n\
            then run\n\
            ```bash::SHELL\nnpm test\n```\n\
            ```js::b.js\nconst b = 2;\n```\n\
            ```js\nnot an edit\n```";

        let edits = parse_code_blocks(reply);
        assert_eq!(edits.len(), 3);
        assert_eq!(
            edits[0],
            CodeEdit {
                language: "js".to_string(),
                filepath: "a.js".to_string(),
                content: "const a = 1;".to_string(),
            }
        );
        assert!(edits[1].is_shell());
        assert_eq!(edits[1].language, "bash");
        assert_eq!(edits[1].content, "npm test");
        assert_eq!(edits[2].filepath, "b.js");

        // Parsing is a pure function of the text.
        assert_eq!(parse_code_blocks(reply), edits);
        assert!(parse_code_blocks("no code here").is_empty());
    }

    #[test]
    fn writes_files_under_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("x");
        let edits = parse_code_blocks("```js::src/App.js\nconsole.log(1)\n```");

        let written = write_code_to_files(&edits, &base).unwrap();
        assert_eq!(written, vec!["src/App.js".to_string()]);
        assert_eq!(
            fs::read_to_string(base.join("src/App.js")).unwrap(),
            "console.log(1)"
        );
    }

    #[test]
    fn shell_edits_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let edits = parse_code_blocks("```bash::SHELL\nrm -rf /\n```\n```css::a.css\nbody{}\n```");
        let written = write_code_to_files(&edits, dir.path()).unwrap();
        assert_eq!(written, vec!["a.css".to_string()]);
        assert!(!dir.path().join("SHELL").exists());
    }

    #[test]
    fn escaping_paths_are_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base");

        for bad in ["../evil.js", "src/../../evil.js", "/etc/passwd", "."] {
            let edits = vec![
                CodeEdit {
                    language: "js".to_string(),
                    filepath: "ok.js".to_string(),
                    content: "ok".to_string(),
                },
                CodeEdit {
                    language: "js".to_string(),
                    filepath: bad.to_string(),
                    content: "bad".to_string(),
                },
            ];
            let result = write_code_to_files(&edits, &base);
            assert!(
                matches!(result, Err(AgentError::PathEscape { .. })),
                "{bad} should be rejected"
            );
            assert!(!base.join("ok.js").exists());
        }

        assert_eq!(
            resolve_within(&base, "src/./lib/../main.js").unwrap(),
            base.join("src/main.js")
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_cannot_escape_base_dir() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&base).unwrap();
        fs::create_dir_all(&outside).unwrap();
        symlink(&outside, base.join("link")).unwrap();
        symlink(outside.join("target.js"), base.join("file.js")).unwrap();

        for filepath in ["link/evil.js", "link/nested/evil.js", "file.js"] {
            let edits = vec![CodeEdit {
                language: "js".to_string(),
                filepath: filepath.to_string(),
                content: "bad".to_string(),
            }];
            let result = write_code_to_files(&edits, &base);
            assert!(
                matches!(result, Err(AgentError::PathEscape { .. })),
                "{filepath} should be rejected"
            );
        }
        assert!(!outside.join("evil.js").exists());
        assert!(!outside.join("nested").exists());
        assert!(!outside.join("target.js").exists());

        // A symlink that stays inside the base is fine.
        fs::create_dir_all(base.join("real")).unwrap();
        symlink(base.join("real"), base.join("alias")).unwrap();
        assert!(resolve_within(&base, "alias/ok.js").is_ok());
    }

    #[test]
    fn knowledge_base_reads_md_and_txt_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "beta").unwrap();
        fs::write(dir.path().join("a.md"), "alpha").unwrap();
        fs::write(dir.path().join("c.json"), "{}").unwrap();

        let kb = load_knowledge_base(dir.path());
        assert!(kb.find("alpha").unwrap() < kb.find("beta").unwrap());
        assert!(!kb.contains("{}"));
        assert_eq!(load_knowledge_base(&dir.path().join("missing")), "");
    }

    #[tokio::test]
    async fn generate_code_appends_both_turns_and_parses_edits() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stack.md"), "We use React.").unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok("```js::src/App.js\nconsole.log(1)\n```".to_string()),
            Ok("Nothing to change.".to_string()),
        ]);
        let mut engine = engine(backend.clone(), dir.path());

        let context = TaskContext {
            last_error: Some("TypeError: x is undefined".to_string()),
            ..Default::default()
        };
        let generation = engine.generate_code("add logging", &context).await.unwrap();
        assert_eq!(generation.code_edits.len(), 1);
        assert_eq!(generation.usage.output_tokens, 5);
        assert_eq!(engine.history_len(), 2);

        let generation = engine
            .generate_code("anything else?", &TaskContext::default())
            .await
            .unwrap();
        assert!(generation.code_edits.is_empty());
        assert_eq!(engine.history_len(), 4);

        let seen = backend.seen.lock().unwrap();
        let (first_system, first_messages) = &seen[0];
        assert!(first_system.contains("We use React."));
        assert!(first_system.contains("## Last Error"));
        assert!(!first_system.contains("## UX Feedback"));
        assert_eq!(first_messages.len(), 1);

        let (second_system, second_messages) = &seen[1];
        assert!(!second_system.contains("## Last Error"));
        assert_eq!(second_messages.len(), 3);
        assert_eq!(second_messages[1].content, "```js::src/App.js\nconsole.log(1)\n```");
    }

    #[tokio::test]
    async fn failed_generation_propagates_and_keeps_history_clean() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![Err(AgentError::Upstream {
            status: 500,
            body: "boom".to_string(),
        })]);
        let mut engine = engine(backend, dir.path());

        let result = engine.generate_code("task", &TaskContext::default()).await;
        assert!(matches!(result, Err(AgentError::Upstream { status: 500, .. })));
        assert_eq!(engine.history_len(), 0);
    }

    #[tokio::test]
    async fn history_is_bounded_and_clearable() {
        let dir = tempfile::tempdir().unwrap();
        let replies = (0..5).map(|i| Ok(format!("reply {i}"))).collect();
        let backend = ScriptedBackend::new(replies);
        let mut engine = TaskEngine::new(backend, String::new(), dir.path(), 64, 4);

        for i in 0..5 {
            engine
                .generate_code(&format!("task {i}"), &TaskContext::default())
                .await
                .unwrap();
        }
        assert_eq!(engine.history_len(), 4);
        assert_eq!(engine.history().next().unwrap().content, "task 3");

        engine.clear_history();
        assert_eq!(engine.history_len(), 0);
    }

    #[tokio::test]
    async fn odd_turn_limit_keeps_history_starting_with_user() {
        let dir = tempfile::tempdir().unwrap();
        let replies = (0..4).map(|i| Ok(format!("reply {i}"))).collect();
        let backend = ScriptedBackend::new(replies);
        let mut engine = TaskEngine::new(backend.clone(), String::new(), dir.path(), 64, 3);

        for i in 0..4 {
            engine
                .generate_code(&format!("task {i}"), &TaskContext::default())
                .await
                .unwrap();
        }
        assert_eq!(engine.history_len(), 4);
        assert_eq!(engine.history().next().unwrap().role, crate::backend::Role::User);

        let seen = backend.seen.lock().unwrap();
        assert!(seen
            .iter()
            .all(|(_, messages)| messages[0].role == crate::backend::Role::User));
    }

    #[tokio::test]
    async fn templated_callers_shape_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![Ok("ok".to_string()), Ok("ok".to_string())]);
        let mut engine = engine(backend.clone(), dir.path());

        engine
            .fix_code("SyntaxError: unexpected token", &TaskContext::default())
            .await
            .unwrap();
        engine
            .improve_ux("buttons are too small", 150, &TaskContext::default())
            .await
            .unwrap();

        let seen = backend.seen.lock().unwrap();
        assert!(seen[0].1[0].content.contains("SyntaxError: unexpected token"));
        assert!(seen[0].0.contains("## Last Error"));
        let ux_task = &seen[1].1.last().unwrap().content;
        assert!(ux_task.contains("100% confidence"));
        assert!(ux_task.contains("buttons are too small"));
        assert!(seen[1].0.contains("## UX Feedback"));
    }
}
