//! Prompt templates for investigation and analysis.
//!
//! Templates are rendered with Handlebars. Gathered evidence is embedded as
//! pretty JSON through the `json` helper so the model sees exactly what the
//! session stores.

use handlebars::Handlebars;
use serde::Serialize;

use crate::budget::InvestigationContext;
use crate::errors::{RemediateError, RemediateResult};
use crate::safety::OperationType;

/// Prompt pair for one model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptData<'a> {
    context: &'a InvestigationContext,
    operations: Vec<&'static str>,
    step: u32,
    max_iterations: usize,
    remaining: usize,
}

/// Renders the investigation and analysis prompts.
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl PromptRenderer {
    pub fn new() -> RemediateResult<Self> {
        let mut handlebars = Handlebars::new();
        // Prompts are not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper(
            "json",
            Box::new(
                |h: &handlebars::Helper,
                 _: &Handlebars,
                 _: &handlebars::Context,
                 _: &mut handlebars::RenderContext,
                 out: &mut dyn handlebars::Output| {
                    if let Some(param) = h.param(0) {
                        let json = serde_json::to_string_pretty(param.value())
                            .unwrap_or_else(|_| "null".to_string());
                        out.write(&json)?;
                    }
                    Ok(())
                },
            ),
        );

        for (name, template) in [
            ("system", SYSTEM_TEMPLATE),
            ("investigate", INVESTIGATE_TEMPLATE),
            ("analyze", ANALYZE_TEMPLATE),
        ] {
            handlebars
                .register_template_string(name, template)
                .map_err(|e| RemediateError::PromptError {
                    reason: format!("invalid {name} template: {e}"),
                })?;
        }

        Ok(Self { handlebars })
    }

    /// Prompt asking for the next investigation step.
    pub fn investigation(
        &self,
        context: &InvestigationContext,
        step: u32,
        max_iterations: usize,
        used_iterations: usize,
    ) -> RemediateResult<RenderedPrompt> {
        self.render("investigate", context, step, max_iterations, used_iterations)
    }

    /// Prompt asking for the final analysis once investigation is complete.
    pub fn analysis(
        &self,
        context: &InvestigationContext,
        step: u32,
        max_iterations: usize,
        used_iterations: usize,
    ) -> RemediateResult<RenderedPrompt> {
        self.render("analyze", context, step, max_iterations, used_iterations)
    }

    fn render(
        &self,
        template: &str,
        context: &InvestigationContext,
        step: u32,
        max_iterations: usize,
        used_iterations: usize,
    ) -> RemediateResult<RenderedPrompt> {
        let data = PromptData {
            context,
            operations: OperationType::ALL.map(OperationType::as_str).to_vec(),
            step,
            max_iterations,
            remaining: max_iterations.saturating_sub(used_iterations),
        };
        let render = |name: &str| {
            self.handlebars
                .render(name, &data)
                .map_err(|e| RemediateError::PromptError {
                    reason: format!("failed to render {name} prompt: {e}"),
                })
        };
        Ok(RenderedPrompt {
            system: render("system")?,
            user: render(template)?,
        })
    }
}

/// Follow-up message sent after a response failed to parse.
#[must_use]
pub fn correction_hint(error: &RemediateError) -> String {
    format!(
        "Your previous response could not be used: {error}\n\n\
         Reply again with a single JSON object that matches the requested schema exactly. \
         Do not include prose or markdown fences."
    )
}

const SYSTEM_TEMPLATE: &str = r#"You are a Kubernetes site reliability engineer diagnosing a reported problem.

You investigate by requesting read-only cluster data. You never change the cluster during investigation; remediation commands are proposed separately, reviewed and dry-run before anyone executes them.

Allowed data request types: {{#each operations}}{{this}}{{#unless @last}}, {{/unless}}{{/each}}.
- get: list or fetch resources, e.g. "pods -l app=web" or "deployment/web"
- describe: detailed state and recent events of one resource
- logs: container logs of one pod; add "-c name" or "--previous" when needed
- events: recent events in a namespace, optionally for one object
- top: resource usage of pods or nodes
- explain: field documentation for a kind

Requests that use any other type, shell syntax or credential flags are rejected and recorded as such.
Errors returned by a request are evidence too: "not found" or "forbidden" tells you something.

Always reply with exactly one JSON object and nothing else."#;

const INVESTIGATE_TEMPLATE: &str = r#"## Issue
{{context.issue}}

Session: {{context.sessionId}}
{{#if context.initialContext}}
## Reporter context
{{{json context.initialContext}}}
{{/if}}
{{#if context.validation}}
## Validation
The following remediation commands were executed:
{{#each context.validation.executedCommands}}
- {{this}}
{{/each}}

Verify this outcome: {{context.validation.intent}}
Determine whether the issue is now resolved or still active.
{{/if}}
{{#if context.reset}}
Note: earlier evidence was condensed to keep this prompt within budget. Re-request anything you still need.
{{/if}}
{{#if context.summaries}}
## Earlier findings
{{#each context.summaries}}
- Step {{step}}: {{rationale}}
{{#each findings}}
  - {{this}}
{{/each}}
{{/each}}
{{/if}}
{{#if context.iterations}}
## Gathered data
{{{json context.iterations}}}
{{/if}}
{{#if context.feedback}}
## Feedback on your previous proposal
{{#each context.feedback}}
- {{this}}
{{/each}}
{{/if}}

## Step {{step}} of at most {{maxIterations}} ({{remaining}} remaining)
Decide whether you have enough evidence to explain the issue.

Respond with:
{
  "rationale": "what you learned and why you need the data below",
  "dataRequests": [
    {"type": "get|describe|logs|events|top|explain", "resource": "kind/name or kind with flags", "namespace": "namespace or omit", "rationale": "why"}
  ],
  "complete": false,
  "confidence": 0.0
}

Set "complete" to true and leave "dataRequests" empty once the root cause is clear or further data would not change the conclusion. "confidence" is a number between 0 and 1."#;

const ANALYZE_TEMPLATE: &str = r#"## Issue
{{context.issue}}

Session: {{context.sessionId}}
{{#if context.initialContext}}
## Reporter context
{{{json context.initialContext}}}
{{/if}}
{{#if context.validation}}
## Validation
Executed commands:
{{#each context.validation.executedCommands}}
- {{this}}
{{/each}}

Expected outcome: {{context.validation.intent}}
Report "resolved" only if the evidence shows this outcome. If the problem remains, report "active" and propose follow-up actions.
{{/if}}
{{#if context.summaries}}
## Earlier findings
{{#each context.summaries}}
- Step {{step}}: {{rationale}}
{{#each findings}}
  - {{this}}
{{/each}}
{{/each}}
{{/if}}
{{#if context.iterations}}
## Gathered data
{{{json context.iterations}}}
{{/if}}
{{#if context.feedback}}
## Feedback on your previous proposal
{{#each context.feedback}}
- {{this}}
{{/each}}
{{/if}}

## Final analysis
The investigation is complete. Produce the root cause analysis and a remediation plan.

Respond with:
{
  "issueStatus": "active|resolved|nonexistent",
  "rootCause": "one or two sentences",
  "confidence": 0.0,
  "factors": ["evidence supporting the root cause"],
  "remediation": {
    "summary": "what the plan does",
    "actions": [
      {
        "description": "what this command changes",
        "command": "kubectl ...",
        "risk": "low|medium|high",
        "rationale": "why this fixes the root cause",
        "fullResourceDefinition": "optional YAML manifest, used with 'kubectl apply -f -'"
      }
    ],
    "risk": "low|medium|high"
  },
  "validationIntent": "what to check after the commands run"
}

Rules:
- Every command is a single kubectl invocation; no shell pipes, redirects or substitutions.
- Commands are dry-run with --dry-run=server before they are shown and rejected if the dry-run fails. Never add --dry-run yourself.
- Use "resolved" when the issue existed but has cleared, and "nonexistent" when it never existed. Both need no actions.
- "confidence" is a number between 0 and 1."#;
