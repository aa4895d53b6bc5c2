//! Catalog of agent roles.
//!
//! Each role carries a prompt prefix that frames the task text handed to a
//! spawned worker. The catalog is static; lookups are case-insensitive and
//! unknown ids fall back to [`GENERALIST`].

use serde::Serialize;
use tracing::warn;

/// Id of the fallback role.
pub const GENERALIST: &str = "generalist";

/// A named agent role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Role {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    /// Kinds of work this role is suited for.
    pub task_hints: &'static [&'static str],
    pub prompt_prefix: &'static str,
}

static ROLES: [Role; 7] = [
    Role {
        id: "architect",
        display_name: "Architect",
        description: "Designs system structure, module boundaries and interfaces",
        task_hints: &["design", "architecture", "planning", "interfaces"],
        prompt_prefix: "You are a software architect. Focus on structure, module boundaries, \
                        data flow and trade-offs. Produce a concrete design before any code.",
    },
    Role {
        id: "implementer",
        display_name: "Implementer",
        description: "Writes production code that follows the agreed design",
        task_hints: &["implement", "feature", "fix", "refactor"],
        prompt_prefix: "You are an implementation engineer. Write clean, working code that \
                        follows the existing conventions of the codebase.",
    },
    Role {
        id: "tester",
        display_name: "Tester",
        description: "Writes and runs tests, reproduces and isolates defects",
        task_hints: &["test", "reproduce", "coverage", "verify"],
        prompt_prefix: "You are a test engineer. Write thorough tests, cover edge cases and \
                        report failures with exact reproduction steps.",
    },
    Role {
        id: "reviewer",
        display_name: "Reviewer",
        description: "Reviews changes for correctness, security and maintainability",
        task_hints: &["review", "audit", "security"],
        prompt_prefix: "You are a code reviewer. Examine the changes for bugs, security issues \
                        and maintainability problems, and list concrete findings.",
    },
    Role {
        id: "devops",
        display_name: "DevOps Engineer",
        description: "Handles builds, CI pipelines, packaging and deployment",
        task_hints: &["build", "deploy", "ci", "release", "infrastructure"],
        prompt_prefix: "You are a DevOps engineer. Focus on build reproducibility, CI \
                        pipelines, packaging and safe deployment.",
    },
    Role {
        id: "documenter",
        display_name: "Documenter",
        description: "Writes user and developer documentation",
        task_hints: &["docs", "readme", "changelog", "guide"],
        prompt_prefix: "You are a technical writer. Produce clear, accurate documentation \
                        aimed at the people who will use and maintain this code.",
    },
    Role {
        id: GENERALIST,
        display_name: "Generalist",
        description: "General-purpose software engineer",
        task_hints: &["general"],
        prompt_prefix: "You are an experienced software engineer. Complete the task carefully \
                        and report what you changed.",
    },
];

/// Look up a role by id, case-insensitively.
///
/// Unknown ids resolve to the generalist role and log a warning.
pub fn get_role(id: &str) -> &'static Role {
    if let Some(role) = find_role(id) {
        return role;
    }
    warn!(role = id, "Unknown role, falling back to generalist");
    generalist()
}

/// Look up a role without falling back.
pub fn find_role(id: &str) -> Option<&'static Role> {
    let id = id.trim();
    ROLES.iter().find(|r| r.id.eq_ignore_ascii_case(id))
}

/// Full catalog in stable order.
pub fn list_roles() -> &'static [Role] {
    &ROLES
}

/// Prompt prefix for the role with the given id.
pub fn prompt_prefix_for(id: &str) -> &'static str {
    get_role(id).prompt_prefix
}

fn generalist() -> &'static Role {
    // The catalog is static and always ends with the generalist.
    &ROLES[ROLES.len() - 1]
}
