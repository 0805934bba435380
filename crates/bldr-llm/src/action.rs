use serde::{Deserialize, Serialize};

use crate::describe::{Property, Schema};
use crate::error::Error;

/// The type-specific payload of an [`Action`].
///
/// Serializes as `{"type": "create_file", "data": {...}}`, which is the shape
/// model providers return and the push channel forwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ActionKind {
    CreateFile { path: String, content: String },
    CreateFolder { path: String },
    InstallPackage { packages: Vec<String> },
    Deploy { target: String },
    RunCommand { command: String },
}

impl ActionKind {
    /// The wire name of this action type (e.g. `"create_file"`).
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::CreateFile { .. } => "create_file",
            ActionKind::CreateFolder { .. } => "create_folder",
            ActionKind::InstallPackage { .. } => "install_package",
            ActionKind::Deploy { .. } => "deploy",
            ActionKind::RunCommand { .. } => "run_command",
        }
    }

    /// Short human-readable summary, e.g. "Create src/App.tsx".
    pub fn summary(&self) -> String {
        match self {
            ActionKind::CreateFile { path, .. } => format!("Create {path}"),
            ActionKind::CreateFolder { path } => format!("Create folder {path}"),
            ActionKind::InstallPackage { packages } => {
                format!("Install {}", packages.join(", "))
            }
            ActionKind::Deploy { target } => format!("Deploy to {target}"),
            ActionKind::RunCommand { command } => format!("Run `{command}`"),
        }
    }
}

/// One apply-once unit of project mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default)]
    pub completed: bool,
    /// 0–100.
    #[serde(default)]
    pub progress: u8,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            completed: false,
            progress: 0,
        }
    }

    pub fn create_file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(ActionKind::CreateFile {
            path: path.into(),
            content: content.into(),
        })
    }

    pub fn create_folder(path: impl Into<String>) -> Self {
        Self::new(ActionKind::CreateFolder { path: path.into() })
    }

    pub fn install_package<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ActionKind::InstallPackage {
            packages: packages.into_iter().map(Into::into).collect(),
        })
    }

    pub fn run_command(command: impl Into<String>) -> Self {
        Self::new(ActionKind::RunCommand {
            command: command.into(),
        })
    }

    pub fn deploy(target: impl Into<String>) -> Self {
        Self::new(ActionKind::Deploy {
            target: target.into(),
        })
    }

    /// Build an action from a function call emitted by a model: the function
    /// name is the action type and the JSON arguments are its data.
    pub fn from_call(name: &str, arguments: &str) -> Result<Self, Error> {
        let data: serde_json::Value = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments)?
        };
        let kind: ActionKind =
            serde_json::from_value(serde_json::json!({ "type": name, "data": data }))
                .map_err(|e| Error::MalformedPlan(format!("invalid `{name}` action: {e}")))?;
        Ok(Self::new(kind))
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.progress = 100;
    }
}

/// A function descriptor for one action type, sent to models that support
/// tool calling.
#[derive(Debug, Clone)]
pub struct ActionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Schema,
}

fn string_prop(name: &str, description: &str) -> Property {
    Property {
        name: name.into(),
        schema: Schema::String {
            description: Some(description.into()),
        },
    }
}

fn object(properties: Vec<Property>) -> Schema {
    Schema::Object {
        description: None,
        properties,
    }
}

/// Descriptors for every action type, in a stable order.
pub fn definitions() -> Vec<ActionDefinition> {
    vec![
        ActionDefinition {
            name: "create_folder".into(),
            description: "Create a folder in the project. Parent folders are created as needed."
                .into(),
            parameters: object(vec![string_prop(
                "path",
                "Folder path relative to the project root",
            )]),
        },
        ActionDefinition {
            name: "create_file".into(),
            description: "Create a file, or replace the content of an existing file.".into(),
            parameters: object(vec![
                string_prop("path", "File path relative to the project root"),
                string_prop("content", "The full file content"),
            ]),
        },
        ActionDefinition {
            name: "install_package".into(),
            description: "Install one or more packages with the project's package manager."
                .into(),
            parameters: object(vec![Property {
                name: "packages".into(),
                schema: Schema::Array {
                    description: Some("Package names, optionally with a version".into()),
                    items: Box::new(Schema::String { description: None }),
                },
            }]),
        },
        ActionDefinition {
            name: "run_command".into(),
            description: "Run a shell command in the project sandbox.".into(),
            parameters: object(vec![string_prop("command", "The shell command to run")]),
        },
        ActionDefinition {
            name: "deploy".into(),
            description: "Deploy the project to a named target.".into(),
            parameters: object(vec![string_prop("target", "Deployment target name")]),
        },
    ]
}
