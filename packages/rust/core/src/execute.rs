//! Execution stage: generate code with the oracle, run it in the sandbox,
//! and render the outcome as a Markdown report.

use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use pagewise_sandbox::{ExecutionResult, Sandbox};

use crate::context::{history_display, knowledge_base};
use crate::intent::{ExecutionCategory, ExecutionIntent};
use crate::oracle::Oracle;
use crate::session::SessionState;

/// How generated code is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Shell,
    Script,
}

impl ExecutionMode {
    pub fn for_category(category: ExecutionCategory) -> Self {
        match category {
            ExecutionCategory::Shell => Self::Shell,
            _ => Self::Script,
        }
    }

    /// Fence language used when showing the generated code.
    fn language(&self) -> &'static str {
        match self {
            Self::Shell => "bash",
            Self::Script => "python",
        }
    }
}

/// Knowledge base handed to code generation: the frozen selection, or every
/// visited page when the selection is empty.
fn execution_knowledge(state: &SessionState) -> String {
    let registry = state.registry();
    if state.selection().is_empty() {
        knowledge_base(registry, &registry.visited_indices())
    } else {
        knowledge_base(registry, state.selection())
    }
}

/// Build the code-generation prompt.
pub fn code_prompt(state: &SessionState, intent: &ExecutionIntent, knowledge: &str) -> String {
    let mode = ExecutionMode::for_category(intent.category);
    let target = match mode {
        ExecutionMode::Shell => "a POSIX shell script",
        ExecutionMode::Script => {
            "a Python 3 script. The globals `website_content`, `user_question` and `execution_type` are predefined. \
             Only the standard library is available and os, sys, subprocess, shutil, glob, socket, urllib, http, \
             pathlib, ctypes, multiprocessing, importlib and pty may not be imported"
        }
    };

    format!(
        r#"You write code that answers a user's request using the website content below.

{history}USER REQUEST: {question}
CLEANED REQUEST: {cleaned}
EXECUTION TYPE: {category}
INSTRUCTION: {instruction}

WEBSITE CONTENT:
{knowledge}

Write {target}.
The code must:
1. work from the website content above,
2. do exactly what the request asks,
3. be safe to run (no network access, no file changes outside the working directory),
4. print clear, human-readable results.

For calculations, print the intermediate steps. Keep the code short and commented.

Reply with the code only, with no explanation."#,
        history = history_display(state.history()),
        question = state.question(),
        cleaned = intent.cleaned,
        category = intent.category,
        instruction = state.config().instruction,
    )
}

/// Remove a surrounding code fence: a first line starting with three
/// backticks and a final line that is exactly a closing fence.
pub fn strip_code_fence(code: &str) -> String {
    let trimmed = code.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut lines: Vec<&str> = trimmed.lines().skip(1).collect();
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    lines.join("\n")
}

/// Render a sandbox result as a Markdown report.
pub fn format_report(code: &str, mode: ExecutionMode, result: &ExecutionResult) -> String {
    let lang = mode.language();
    if result.success {
        let mut report = format!(
            "## Code Execution Results\n\n**Generated Code:**\n```{lang}\n{code}\n```\n\n**Output:**\n```\n{stdout}\n```\n\n**Execution Time:** {elapsed:.2} seconds\n",
            stdout = result.stdout,
            elapsed = result.elapsed_seconds,
        );
        if !result.stderr.is_empty() {
            report.push_str(&format!("\n**Warnings/Errors:**\n```\n{}\n```\n", result.stderr));
        }
        report
    } else {
        format!(
            "## Code Execution Failed\n\n**Generated Code:**\n```{lang}\n{code}\n```\n\n**Error:**\n```\n{stderr}\n```\n\n**Execution Time:** {elapsed:.2} seconds\n\n\
             The code could not be run to completion. This can be caused by security restrictions, missing dependencies, \
             or a problem in the generated code. Try rephrasing the request or asking for a different approach.\n",
            stderr = result.stderr,
            elapsed = result.elapsed_seconds,
        )
    }
}

/// Report returned when code generation itself fails.
pub fn generation_error_report(error: &str) -> String {
    format!(
        "## Code Generation/Execution Error\n\nNo code could be generated for this request.\n\n**Error:** {error}\n\n\
         Try rephrasing the request. Code execution needs a trigger word such as EXECUTE, RUN_CODE or ANALYZE_DATA.\n"
    )
}

/// Generate code for the current question, run it, and return the report.
#[instrument(skip_all, fields(category = %intent.category))]
pub async fn run_execution(
    oracle: &dyn Oracle,
    sandbox: &Sandbox,
    state: &SessionState,
    intent: &ExecutionIntent,
) -> String {
    let knowledge = execution_knowledge(state);
    let mode = ExecutionMode::for_category(intent.category);

    let code = match oracle.complete(&code_prompt(state, intent, &knowledge)).await {
        Ok(reply) => strip_code_fence(&reply),
        Err(e) => {
            warn!(error = %e, "code generation failed");
            return generation_error_report(&e.to_string());
        }
    };

    let result = match mode {
        ExecutionMode::Shell => sandbox.run_shell(&code).await,
        ExecutionMode::Script => {
            let mut context = Map::new();
            context.insert("website_content".into(), Value::String(knowledge));
            context.insert("user_question".into(), Value::String(intent.cleaned.clone()));
            context.insert("execution_type".into(), Value::String(intent.category.as_str().into()));
            sandbox.run_script(&code, &context).await
        }
    };

    info!(success = result.success, return_code = result.return_code, "generated code executed");
    format_report(&code, mode, &result)
}
