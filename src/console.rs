use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, stdin, stdout},
    sync::Mutex,
};
use tracing::error;

use crate::{
    Dialog, JuResult,
    dialog::{Button, DialogBody, DialogResult, DialogSpec},
};

/// Renders dialogs on the terminal.
pub struct ConsoleDialog {
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl Default for ConsoleDialog {
    fn default() -> Self {
        Self {
            input: Mutex::new(BufReader::new(stdin()).lines()),
        }
    }
}

impl ConsoleDialog {
    async fn ask(&self, prompt: &str) -> JuResult<Option<String>> {
        let mut out = stdout();
        out.write_all(prompt.as_bytes()).await?;
        out.flush().await?;

        let line = self.input.lock().await.next_line().await?;
        Ok(line.map(|l| l.trim().to_owned()))
    }

    async fn prompt(&self, spec: DialogSpec) -> JuResult<Option<DialogResult>> {
        let mut out = stdout();
        out.write_all(format!("\n== {} ==\n", spec.title).as_bytes()).await?;

        let value = match spec.body {
            DialogBody::Text(text) => {
                out.write_all(format!("{text}\n").as_bytes()).await?;
                None
            }
            DialogBody::HostInput { placeholder, value } => {
                let shown = if value.is_empty() { placeholder } else { value.clone() };
                let Some(line) = self.ask(&format!("Backend URL [{shown}]: ")).await? else {
                    return Ok(None);
                };
                Some(if line.is_empty() { value } else { line })
            }
        };

        let Some(button) = self.choose(&spec.buttons).await? else {
            return Ok(None);
        };
        Ok(Some(DialogResult { button, value }))
    }

    /// The last button is the default.
    async fn choose(&self, buttons: &[Button]) -> JuResult<Option<Button>> {
        let Some(default) = buttons.last() else {
            return Ok(Some(Button::ok()));
        };

        if buttons.len() == 1 {
            return Ok(self
                .ask(&format!("[Enter] {}", default.label))
                .await?
                .map(|_| default.clone()));
        }

        let options: Vec<String> = buttons
            .iter()
            .enumerate()
            .map(|(i, b)| format!("{}) {}", i + 1, b.label))
            .collect();
        let Some(line) = self
            .ask(&format!("{}  [{}]: ", options.join("  "), buttons.len()))
            .await?
        else {
            return Ok(None);
        };

        let chosen = line
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| buttons.get(i))
            .or_else(|| buttons.iter().find(|b| b.label.eq_ignore_ascii_case(&line)))
            .unwrap_or(default);
        Ok(Some(chosen.clone()))
    }
}

impl Dialog for ConsoleDialog {
    async fn show(&self, spec: DialogSpec) -> DialogResult {
        match self.prompt(spec).await {
            Ok(Some(result)) => result,
            Ok(None) => DialogResult::dismissed(),
            Err(e) => {
                error!("Console dialog failed: {}", e);
                DialogResult::dismissed()
            }
        }
    }
}
