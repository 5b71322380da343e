//! Prompt construction for each oracle task and the S4 instruction.
//!
//! The wording is not load-bearing; the response formats requested here
//! are the ones the parsers in [`crate::response`] accept.

use fixcorpus_oracle::Prompt;

use crate::domain::{Commit, FileSnapshot, FunctionPair, MaskedFunction, UndefinedElement};
use crate::response::ExtractedElement;

const SECURITY_EXPERT: &str = "You are a security expert specializing in vulnerability analysis of C and C++ code.";

fn fenced(code: &str) -> String {
    let body = code.strip_suffix('\n').unwrap_or(code);
    format!("```c\n{body}\n```")
}

fn element_list(elements: &[UndefinedElement]) -> String {
    if elements.is_empty() {
        return "(none)".to_string();
    }
    elements
        .iter()
        .map(|e| match &e.definition {
            Some(def) => format!("- {} ({:?}): {}", e.name, e.kind, def.text),
            None => format!("- {} ({:?})", e.name, e.kind),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// S0b: does this commit fix a security vulnerability?
pub fn classify(commit: &Commit) -> Prompt {
    let user = format!(
        "Analyze whether the following commit fixes a security vulnerability that exists in the code before the change.\n\
         A merge commit or a commit without a code diff is never a fix.\n\
         Consider buffer management, pointer handling, memory management, input validation, \
         integer overflow, access control and race conditions.\n\
         Finish with a line in the form `Answer: [yes, no, cannot decide]`.\n\n\
         Commit:\n```\n{}\n```",
        commit.render().trim_end()
    );
    Prompt::new(SECURITY_EXPERT, user)
}

/// S2a: the smallest contiguous vulnerable block of the before-body.
pub fn mask(commit: &Commit, pair: &FunctionPair) -> Prompt {
    let user = format!(
        "The commit below fixes a vulnerability in `{name}`.\n\
         Identify the single smallest contiguous block of the function before the fix that is responsible for the vulnerability.\n\
         Reply with exactly one fenced code block containing those lines copied verbatim from the function before the fix. \
         Do not paraphrase, reformat or add lines.\n\n\
         Commit message:\n{message}\n\n\
         Function before the fix:\n{before}\n\n\
         Function after the fix:\n{after}",
        name = pair.name,
        message = commit.message.trim(),
        before = fenced(&pair.before_body),
        after = fenced(&pair.after_body),
    );
    Prompt::new(SECURITY_EXPERT, user)
}

/// S2b, first call: identifiers referenced around the masked span and in
/// the code that replaced it.
pub fn extract(before_window: &str, after_window: &str) -> Prompt {
    let mut code = format!("Code before the fix:\n{}", fenced(before_window));
    if !after_window.trim().is_empty() {
        code.push_str(&format!("\n\nCode after the fix:\n{}", fenced(after_window)));
    }
    let user = format!(
        "List every identifier referenced in the code below that is not a language keyword or literal: \
         functions, variables, pointers, structures, constants and macros.\n\
         Write one element per line as `name (kind)`, for example `copy_name (function)`.\n\n\
         {code}"
    );
    Prompt::new(SECURITY_EXPERT, user)
}

/// S2b, second call: definitions of the extracted identifiers.
pub fn resolve(elements: &[ExtractedElement], pair: &FunctionPair, snapshot: &FileSnapshot) -> Prompt {
    let names = elements
        .iter()
        .map(|e| format!("- {} ({})", e.name, e.description))
        .collect::<Vec<_>>()
        .join("\n");
    let user = format!(
        "For each identifier below, find its defining declaration in the source file. \
         Ignore identifiers that are defined inside `{name}` itself.\n\
         Answer with three lists, quoting the definition line exactly when you find one:\n\
         Functions = [name: definition line, ...]\n\
         Variables = [name: definition line, ...]\n\
         Structures = [name: definition line, ...]\n\n\
         Identifiers:\n{names}\n\n\
         Source file `{path}`:\n{source}",
        name = pair.name,
        path = snapshot.path,
        source = fenced(&snapshot.before),
    );
    Prompt::new(SECURITY_EXPERT, user)
}

/// S3, first call: locate the vulnerability without the diff.
pub fn locate(pair: &FunctionPair, elements: &[UndefinedElement]) -> Prompt {
    let user = format!(
        "The function below contains a security vulnerability. Locate the vulnerable code.\n\
         Reply with exactly one fenced code block containing the vulnerable lines copied verbatim, \
         followed by `Line Numbers: [start-end]`, counting the first line of the function as line 1.\n\n\
         Function:\n{body}\n\n\
         Context:\n{context}",
        body = fenced(&pair.before_body),
        context = element_list(elements),
    );
    Prompt::new(SECURITY_EXPERT, user)
}

/// S3, second call: explain the located span.
pub fn explain(pair: &FunctionPair, located: &str, elements: &[UndefinedElement]) -> Prompt {
    let user = format!(
        "Explain the vulnerability in the highlighted segment of `{name}`. \
         Do not refer to fixes or commit messages.\n\
         Answer with two fields:\n\
         Root Cause: <precise technical cause>\n\
         Impact: <consequence if exploited>\n\n\
         Vulnerable segment:\n{segment}\n\n\
         Function:\n{body}\n\n\
         Context:\n{context}",
        name = pair.name,
        segment = fenced(located),
        body = fenced(&pair.before_body),
        context = element_list(elements),
    );
    Prompt::new(SECURITY_EXPERT, user)
}

/// S4 training instruction for a masked function.
pub fn instruction(masked: &MaskedFunction, elements: &[UndefinedElement]) -> String {
    format!(
        "The following C/C++ function contains a security vulnerability hidden behind the placeholder {placeholder}.\n\
         Replace {placeholder} with secure code so that the function is correct and free of the vulnerability.\n\n\
         Function:\n{body}\n\n\
         Context:\n{context}",
        placeholder = masked.placeholder,
        body = fenced(&masked.masked_body),
        context = element_list(elements),
    )
}
