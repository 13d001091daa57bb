//! Messages sent to the collaborator.
//!
//! The conversation is append-only: one system message describing the role,
//! the environment and the policy language, then alternating requests and
//! replies.

use gymcraft_vm::{ChatMessage, Error, PolicyMemory, PolicySchema};
use serde_json::Value;

/// How a policy must be written and returned. Repeated in every request.
pub fn formalism(entry: &str) -> String {
    format!(
        "Please reason step-by-step and analyze the given environment. \
         After your reasoning, write a policy module whose function \"{entry}\" takes \
         [\"observation\", \"memory\"] as params and RETURNs the action. \
         You are free to use memory to store information between steps: it is {{}} at the \
         beginning of each episode and whatever \"memory\" holds when \"{entry}\" returns is \
         passed to the next call. \
         The module should be returned in the following format:\n\n\
         ```json\n\
         {{\"functions\": {{\"{entry}\": {{\"params\": [\"observation\", \"memory\"], \"code\": [ ... ]}}}}}}\n\
         ```\n"
    )
}

pub fn system_message(environment: &str, schema: &PolicySchema) -> ChatMessage {
    ChatMessage::system(format!(
        "You are an RL agent that needs to produce code that solves an RL environment. \
         The environment is the following:\n\n{}\n\n{}",
        environment,
        schema.to_prompt()
    ))
}

pub fn initial_request(entry: &str) -> ChatMessage {
    ChatMessage::user(format!(
        "Please write a policy that solves the environment. {}",
        formalism(entry)
    ))
}

/// Report a failed invocation so the collaborator can fix the policy.
pub fn failure_report(
    observation: &Value,
    memory: &PolicyMemory,
    error: &Error,
    trace: &str,
    entry: &str,
) -> ChatMessage {
    let mut content = format!(
        "An error happened when executing \"{}\". The observation was {}. The memory was {}. \
         The error was: {}.",
        entry,
        observation,
        memory.to_json(),
        error
    );
    if !trace.is_empty() {
        content.push_str(&format!("\nThe last executed instructions were:\n{}\n", trace));
    }
    content.push_str(" Please redefine the policy so that it works correctly. ");
    content.push_str(&formalism(entry));
    ChatMessage::user(content)
}

/// End-of-episode feedback. A new policy is invited, not required.
pub fn learn_feedback(cumulative_reward: f64) -> ChatMessage {
    ChatMessage::user(format!(
        "The episode has ended with a cumulative reward of {}. \
         You can now try to propose an improved policy if you wish so. \
         If so, please follow the same formalism as before. \
         If you don't, you can simply not output any policy in your answer.",
        cumulative_reward
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gymcraft_vm::Role;
    use serde_json::json;

    #[test]
    fn test_formalism_names_entry_and_fence() {
        let text = formalism("policy");
        assert!(text.contains("\"policy\""));
        assert!(text.contains("```json\n"));
    }

    #[test]
    fn test_system_message_embeds_environment_and_schema() {
        let msg = system_message("A 5x5 grid.", &PolicySchema::default());
        assert_eq!(msg.role, Role::System);
        assert!(msg.content.contains("A 5x5 grid."));
        assert!(msg.content.contains("# Policy Language"));
    }

    #[test]
    fn test_failure_report_contents() {
        let mut memory = PolicyMemory::new();
        memory.set("seen", json!(1)).unwrap();
        let error = Error::policy_execution("division by zero");
        let msg = failure_report(&json!([0, 1]), &memory, &error, "#1 policy@0 DIV !! division by zero", "policy");

        assert_eq!(msg.role, Role::User);
        assert!(msg.content.contains("The observation was [0,1]"));
        assert!(msg.content.contains(r#"The memory was {"seen":1}"#));
        assert!(msg.content.contains("division by zero"));
        assert!(msg.content.contains("last executed instructions"));
        assert!(msg.content.contains("```json"));
    }

    #[test]
    fn test_learn_feedback() {
        let msg = learn_feedback(0.5);
        assert!(msg.content.starts_with("The episode has ended with a cumulative reward of 0.5."));
    }
}
