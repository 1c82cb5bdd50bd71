//! Plan mode management for a planning-first workflow.
//!
//! While plan mode is active the agent may only use read-only tools to
//! explore the codebase before proposing a plan. The gate is an explicit
//! per-session instance held by the agent.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// The tool that proposes a plan; always allowed in plan mode.
pub const PLAN_CREATION_TOOL: &str = "create_plan";

/// Read-only tools allowed while plan mode is active.
pub const READONLY_TOOLS: &[&str] = &[
    "read_file",
    "grep",
    "glob",
    "git_status",
    "git_diff",
    "git_log",
    "git_branch",
    "web_search",
    "web_fetch",
    "todo_write",
];

/// Status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Drafting,
    PendingApproval,
    Approved,
    Executing,
    Completed,
    Rejected,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Drafting => "drafting",
            PlanStatus::PendingApproval => "pending_approval",
            PlanStatus::Approved => "approved",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Rejected => "rejected",
        }
    }
}

/// Status of a single plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl StepStatus {
    fn icon(self) -> &'static str {
        match self {
            StepStatus::Pending => "[ ]",
            StepStatus::InProgress => "[>]",
            StepStatus::Completed => "[x]",
            StepStatus::Skipped => "[-]",
        }
    }
}

/// A single step in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_affected: Vec<String>,
    #[serde(default)]
    pub status: StepStatus,
}

impl PlanStep {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            files_affected: Vec::new(),
            status: StepStatus::Pending,
        }
    }

    #[must_use]
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files_affected = files;
        self
    }
}

/// An execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
    pub created_at: DateTime<Local>,
}

impl Plan {
    /// Renders the plan as markdown.
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            format!("# Plan: {}", self.goal),
            String::new(),
            format!("Status: {}", self.status.as_str()),
            format!("Created: {}", self.created_at.format("%Y-%m-%d %H:%M")),
            String::new(),
            "## Steps".to_string(),
            String::new(),
        ];

        for (i, step) in self.steps.iter().enumerate() {
            lines.push(format!(
                "{}. {} {}",
                i + 1,
                step.status.icon(),
                step.description
            ));
            for file in &step.files_affected {
                lines.push(format!("   - `{file}`"));
            }
        }

        lines.join("\n")
    }
}

/// Plan mode state machine.
///
/// One plan is live at a time; creating a new plan discards the previous
/// one regardless of its state. The `plan_mode_active` flag is toggled
/// externally and independently restricts tool access while true.
#[derive(Debug, Default)]
pub struct PlanGate {
    plan_mode_active: bool,
    current: Option<Plan>,
}

impl PlanGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters plan mode, discarding any current plan.
    pub fn enter_plan_mode(&mut self) {
        self.plan_mode_active = true;
        self.current = None;
    }

    /// Exits plan mode without touching the current plan.
    pub fn exit_plan_mode(&mut self) {
        self.plan_mode_active = false;
    }

    pub fn is_active(&self) -> bool {
        self.plan_mode_active
    }

    /// Creates a new plan pending approval, replacing any existing plan.
    pub fn create(&mut self, goal: impl Into<String>, steps: Vec<PlanStep>) -> &Plan {
        self.current.insert(Plan {
            goal: goal.into(),
            steps,
            status: PlanStatus::PendingApproval,
            created_at: Local::now(),
        })
    }

    /// Approves the pending plan and exits plan mode.
    ///
    /// Returns false without side effects unless a plan is currently
    /// pending approval.
    pub fn approve(&mut self) -> bool {
        match &mut self.current {
            Some(plan) if plan.status == PlanStatus::PendingApproval => {
                plan.status = PlanStatus::Approved;
                self.plan_mode_active = false;
                true
            }
            _ => false,
        }
    }

    /// Rejects and discards the pending plan, exiting plan mode.
    ///
    /// Returns false without side effects unless a plan is currently
    /// pending approval.
    pub fn reject(&mut self) -> bool {
        match &self.current {
            Some(plan) if plan.status == PlanStatus::PendingApproval => {
                self.current = None;
                self.plan_mode_active = false;
                true
            }
            _ => false,
        }
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.current.as_ref()
    }

    pub fn has_pending_plan(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|p| p.status == PlanStatus::PendingApproval)
    }

    /// Marks a step as in progress. False for out-of-range indices.
    pub fn mark_step_in_progress(&mut self, step_index: usize) -> bool {
        self.set_step_status(step_index, StepStatus::InProgress)
    }

    /// Marks a step as completed. False for out-of-range indices.
    pub fn mark_step_completed(&mut self, step_index: usize) -> bool {
        self.set_step_status(step_index, StepStatus::Completed)
    }

    fn set_step_status(&mut self, step_index: usize, status: StepStatus) -> bool {
        match &mut self.current {
            Some(plan) if step_index < plan.steps.len() => {
                plan.steps[step_index].status = status;
                true
            }
            _ => false,
        }
    }

    /// Checks whether a tool may run under the current gate state.
    ///
    /// Unconditionally true when plan mode is inactive; otherwise only the
    /// read-only set and the plan-creation tool are permitted.
    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        if !self.plan_mode_active {
            return true;
        }
        tool_name == PLAN_CREATION_TOOL || READONLY_TOOLS.contains(&tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_with_pending_plan() -> PlanGate {
        let mut gate = PlanGate::new();
        gate.enter_plan_mode();
        gate.create(
            "Add config loading",
            vec![
                PlanStep::new("Define the struct").with_files(vec!["src/config.rs".to_string()]),
                PlanStep::new("Wire it into startup"),
            ],
        );
        gate
    }

    #[test]
    fn test_create_sets_pending_approval() {
        let gate = gate_with_pending_plan();
        assert!(gate.has_pending_plan());
        assert_eq!(gate.plan().unwrap().status, PlanStatus::PendingApproval);
    }

    #[test]
    fn test_create_replaces_existing_plan() {
        let mut gate = gate_with_pending_plan();
        gate.approve();
        gate.create("A different goal", vec![PlanStep::new("only step")]);

        let plan = gate.plan().unwrap();
        assert_eq!(plan.goal, "A different goal");
        assert_eq!(plan.status, PlanStatus::PendingApproval);
    }

    #[test]
    fn test_approve_transitions_and_exits_plan_mode() {
        let mut gate = gate_with_pending_plan();
        assert!(gate.is_active());

        assert!(gate.approve());
        assert_eq!(gate.plan().unwrap().status, PlanStatus::Approved);
        assert!(!gate.is_active());
    }

    #[test]
    fn test_approve_without_plan_fails() {
        let mut gate = PlanGate::new();
        assert!(!gate.approve());
        assert!(gate.plan().is_none());
    }

    #[test]
    fn test_approve_twice_fails() {
        let mut gate = gate_with_pending_plan();
        assert!(gate.approve());
        assert!(!gate.approve());
    }

    #[test]
    fn test_reject_discards_plan() {
        let mut gate = gate_with_pending_plan();
        assert!(gate.reject());
        assert!(gate.plan().is_none());
        assert!(!gate.is_active());
    }

    #[test]
    fn test_reject_without_plan_fails() {
        let mut gate = PlanGate::new();
        assert!(!gate.reject());
    }

    #[test]
    fn test_entering_plan_mode_discards_plan() {
        let mut gate = gate_with_pending_plan();
        gate.enter_plan_mode();
        assert!(gate.plan().is_none());
        assert!(gate.is_active());
    }

    #[test]
    fn test_tool_gating_in_plan_mode() {
        let mut gate = PlanGate::new();
        gate.enter_plan_mode();

        assert!(gate.is_tool_allowed("read_file"));
        assert!(gate.is_tool_allowed("git_diff"));
        assert!(gate.is_tool_allowed("create_plan"));
        assert!(!gate.is_tool_allowed("write_file"));
        assert!(!gate.is_tool_allowed("bash"));
    }

    #[test]
    fn test_all_tools_allowed_when_inactive() {
        let gate = PlanGate::new();
        assert!(gate.is_tool_allowed("write_file"));
        assert!(gate.is_tool_allowed("bash"));
        assert!(gate.is_tool_allowed("anything_at_all"));
    }

    #[test]
    fn test_step_marking() {
        let mut gate = gate_with_pending_plan();
        assert!(gate.mark_step_in_progress(0));
        assert!(gate.mark_step_completed(0));
        assert!(!gate.mark_step_completed(5));

        assert_eq!(gate.plan().unwrap().steps[0].status, StepStatus::Completed);
        assert_eq!(gate.plan().unwrap().steps[1].status, StepStatus::Pending);
    }

    #[test]
    fn test_markdown_rendering() {
        let mut gate = gate_with_pending_plan();
        gate.mark_step_in_progress(0);

        let md = gate.plan().unwrap().to_markdown();
        assert!(md.starts_with("# Plan: Add config loading"));
        assert!(md.contains("Status: pending_approval"));
        assert!(md.contains("1. [>] Define the struct"));
        assert!(md.contains("   - `src/config.rs`"));
        assert!(md.contains("2. [ ] Wire it into startup"));
    }
}
