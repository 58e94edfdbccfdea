//! Prompt construction for the LLM arbiter

use crate::logic::command::CommandEvent;
use crate::logic::features::FeatureVector;

/// Build the completion prompt for one command.
///
/// Only the command, the working directory, the non-secret fingerprint
/// variables and the extracted features are included.
pub fn build_prompt(event: &CommandEvent, vector: &FeatureVector, reasoning_context: &str) -> String {
    let active: Vec<String> = vector
        .active_features()
        .into_iter()
        .map(|(name, value)| {
            if value == 1.0 {
                name.to_string()
            } else {
                format!("{}={}", name, value)
            }
        })
        .collect();

    let environment: Vec<String> = event
        .environment_fingerprint
        .vars
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    format!(
        "You are a security reviewer gating shell commands issued by an AI coding agent.\n\
         The local rule engine could not settle this command on its own.\n\
         \n\
         COMMAND: {command}\n\
         WORKING DIRECTORY: {cwd}\n\
         ENVIRONMENT: {environment}\n\
         \n\
         EXTRACTED FEATURES: {features}\n\
         \n\
         LOCAL ANALYSIS: {reasoning}\n\
         \n\
         Decide whether the command is reasonable for everyday development work.\n\
         - allow: routine and low impact in this directory\n\
         - deny: destroys data, leaks secrets or changes the system beyond the project\n\
         - escalate: you are unsure and a human should decide\n\
         \n\
         Respond with a single JSON object and nothing else:\n\
         {{\"decision\": \"allow|deny|escalate\", \"confidence\": 0.0-1.0, \"reasoning\": \"one sentence\"}}\n",
        command = event.raw_command,
        cwd = event.working_directory.display(),
        environment = if environment.is_empty() { "unknown".to_string() } else { environment.join(", ") },
        features = if active.is_empty() { "none".to_string() } else { active.join(", ") },
        reasoning = reasoning_context,
    )
}
