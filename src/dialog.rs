//! Dialog requests issued by the connection flow.
//!
//! The flow only describes what to ask; rendering belongs to whoever
//! implements [`crate::Dialog`].

pub const HOST_PLACEHOLDER: &str = "http://localhost:8888/?token=abc123";

pub const RECONNECT_LABEL: &str = "Reconnect";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub accept: bool,
}

impl Button {
    pub fn ok() -> Self {
        Self::accept("OK")
    }

    pub fn cancel() -> Self {
        Self {
            label: "Cancel".into(),
            accept: false,
        }
    }

    pub fn accept<T: Into<String>>(label: T) -> Self {
        Self {
            label: label.into(),
            accept: true,
        }
    }

    pub fn plain<T: Into<String>>(label: T) -> Self {
        Self {
            label: label.into(),
            accept: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogBody {
    Text(String),
    HostInput { placeholder: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogSpec {
    pub title: String,
    pub body: DialogBody,
    pub buttons: Vec<Button>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogResult {
    pub button: Button,
    /// Contents of the input field, for dialogs that have one.
    pub value: Option<String>,
}

impl DialogResult {
    pub fn dismissed() -> Self {
        Self {
            button: Button::cancel(),
            value: None,
        }
    }
}

impl DialogSpec {
    fn notice<T: Into<String>, B: Into<String>>(title: T, body: B, buttons: Vec<Button>) -> Self {
        Self {
            title: title.into(),
            body: DialogBody::Text(body.into()),
            buttons,
        }
    }

    pub fn host_input(value: &str) -> Self {
        Self {
            title: "Connect to a Remote Kernel".into(),
            body: DialogBody::HostInput {
                placeholder: HOST_PLACEHOLDER.into(),
                value: value.to_owned(),
            },
            buttons: vec![Button::cancel(), Button::accept("Connect")],
        }
    }

    pub fn invalid_host() -> Self {
        Self::notice("Cannot Create Connection", "The host field is invalid.", vec![Button::ok()])
    }

    pub fn bind_failed<T: std::fmt::Display>(reason: T) -> Self {
        Self::notice(
            "Cannot Create Connection",
            format!("The remote kernel could not be bound: {reason}"),
            vec![Button::ok()],
        )
    }

    pub fn disconnect_failed<T: std::fmt::Display>(reason: T) -> Self {
        Self::notice(
            "Cannot Disconnect",
            format!("The notebook is still connected to the remote kernel: {reason}"),
            vec![Button::ok()],
        )
    }

    pub fn transport_error() -> Self {
        Self::notice(
            "WebSocket Connection Error",
            "The operation couldn't be completed. Please, check the entered information such as \
             hostname, socket port and token.",
            vec![Button::ok()],
        )
    }

    pub fn connected(origin: &str) -> Self {
        Self::notice(
            "Connected to a Remote Kernel",
            format!(
                "The notebook now runs on a kernel at {origin} and has access to that host's file system. \
                 To disconnect, select another kernel."
            ),
            vec![Button::ok()],
        )
    }

    pub fn disconnected() -> Self {
        Self::notice(
            "Remote Kernel Has Been Disconnected",
            "This session is no longer connected to a remote kernel.",
            vec![Button::plain(RECONNECT_LABEL), Button::ok()],
        )
    }

    pub fn confirm_disconnect() -> Self {
        Self::notice(
            "Disconnect from the Remote Kernel",
            "The notebook will switch back to a local kernel.",
            vec![Button::cancel(), Button::accept("Disconnect")],
        )
    }
}
