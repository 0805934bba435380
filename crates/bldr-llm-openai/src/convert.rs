//! Converts bldr-llm requests into the Chat Completions wire format.

use bldr_llm::{BuildMode, Message, ModelRequest, Role};

use crate::types::{ChatMessage, ChatRequest, ChatTool, FunctionDefinition, StreamOptions};

const DEFAULT_MAX_TOKENS: u32 = 4_096;
const HIGH_POWER_MAX_TOKENS: u32 = 16_384;

/// `reasoning` says whether the model accepts `reasoning_effort`. Without
/// it a thinking request only changes the system prompt.
pub fn to_chat_request(model_id: &str, req: &ModelRequest, reasoning: bool) -> ChatRequest {
    let thinking = req.context.thinking;
    let mut messages = vec![ChatMessage {
        role: "system".into(),
        content: system_prompt(req.context.mode, thinking && !reasoning),
    }];
    messages.extend(req.context.conversation_history.iter().map(history_message));
    messages.push(ChatMessage {
        role: "user".into(),
        content: req.message.clone(),
    });

    let tools = bldr_llm::action::definitions()
        .into_iter()
        .map(|def| ChatTool::Function {
            function: FunctionDefinition {
                name: def.name,
                description: def.description,
                parameters: def.parameters.to_json_schema(),
            },
        })
        .collect();

    let max_tokens = if req.context.high_power {
        HIGH_POWER_MAX_TOKENS
    } else {
        DEFAULT_MAX_TOKENS
    };

    ChatRequest {
        model: model_id.to_string(),
        messages,
        stream: true,
        stream_options: StreamOptions {
            include_usage: true,
        },
        tools,
        tool_choice: Some("auto".into()),
        max_completion_tokens: Some(max_tokens),
        reasoning_effort: (thinking && reasoning).then(|| "high".to_string()),
    }
}

/// Prior assistant turns are replayed with a list of the actions they
/// applied, so the model knows what already exists in the project.
fn history_message(message: &Message) -> ChatMessage {
    let mut content = message.content.clone();
    if !message.actions.is_empty() {
        content.push_str("\n\nApplied actions:");
        for action in &message.actions {
            content.push_str("\n- ");
            content.push_str(&action.kind.summary());
        }
    }
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    };
    ChatMessage {
        role: role.into(),
        content,
    }
}

fn system_prompt(mode: BuildMode, think_aloud: bool) -> String {
    let mut prompt = String::from(
        "You are an application builder. The user describes an application and you create it \
         inside their project by calling the provided functions.\n\n\
         Functions:\n\
         - create_folder: create a folder (paths are relative to the project root)\n\
         - create_file: create or overwrite a file with its full content\n\
         - install_package: install packages with the project's package manager\n\
         - run_command: run a shell command in the project sandbox\n\
         - deploy: deploy the project to a named target\n\n\
         Guidelines:\n\
         - Call functions in the order they must be applied; later steps may depend on files created earlier.\n\
         - Create folders before the files inside them.\n\
         - Explain briefly what you are building before calling functions.\n\
         - Only deploy when the user asks for it.",
    );
    if mode == BuildMode::V2 {
        prompt.push_str(
            "\n- Start with a short numbered plan of the steps, then carry the plan out.",
        );
    }
    if think_aloud {
        prompt.push_str("\n- Reason through the design carefully before calling any function.");
    }
    prompt
}
