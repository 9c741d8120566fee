//! Line-oriented terminal front end for the approval queue.

use std::io::Write;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::approvals::{ApprovalQueue, PendingApproval, QueueView};
use crate::form::{Control, DynamicForm, FormValues, SubmitEvent, Widget};

pub const EMPTY_QUEUE_MESSAGE: &str = "No pending approval requests.";

const HELP: &str = "\
commands:
  list            show pending approvals
  show <n>        show the form of approval <n>
  approve <n>     fill in the form of approval <n> and approve it
  reject <n>      reject approval <n>
  help            show this message
  quit            exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    List,
    Show(usize),
    Approve(usize),
    Reject(usize),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command `{0}`, type `help`")]
    Unknown(String),
    #[error("`{0}` needs an approval number")]
    MissingIndex(&'static str),
    #[error("`{0}` is not a valid approval number")]
    BadIndex(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let verb = verb.to_lowercase();
    let command = match verb.as_str() {
        "list" | "ls" => Command::List,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        "show" => Command::Show(index_arg("show", words.next())?),
        "approve" | "a" => Command::Approve(index_arg("approve", words.next())?),
        "reject" | "r" => Command::Reject(index_arg("reject", words.next())?),
        _ => return Err(CommandError::Unknown(verb)),
    };
    Ok(Some(command))
}

fn index_arg(verb: &'static str, arg: Option<&str>) -> Result<usize, CommandError> {
    let arg = arg.ok_or(CommandError::MissingIndex(verb))?;
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(CommandError::BadIndex(arg.to_string())),
    }
}

/// Numbered listing, newest first.
pub fn render_queue(view: &QueueView) -> String {
    let QueueView::Pending(entries) = view else {
        return EMPTY_QUEUE_MESSAGE.to_string();
    };
    let mut out = String::new();
    for (n, entry) in entries.iter().enumerate() {
        out.push_str(&format!("[{}] {}", n + 1, headline(entry)));
        if let Some(agent) = &entry.request.agent {
            out.push_str(&format!(" (from {agent})"));
        }
        out.push('\n');
        for file in &entry.request.files {
            out.push_str(&format!("      {}\n", file.path));
        }
    }
    out
}

fn headline(entry: &PendingApproval) -> String {
    let title = entry
        .schema
        .title_text()
        .or(entry.request.title.as_deref())
        .unwrap_or("Untitled request");
    format!("{title} <{}>", entry.id)
}

/// Text rendering of a form's controls.
pub fn render_controls(controls: &[Control]) -> String {
    if controls.is_empty() {
        return "  (no fields)\n".to_string();
    }
    let mut out = String::new();
    for control in controls {
        match &control.widget {
            Widget::SingleLine { placeholder, value } | Widget::MultiLine { placeholder, value } => {
                let shown = if value.is_empty() {
                    placeholder.as_deref().map(|p| format!("<{p}>")).unwrap_or_default()
                } else {
                    value.clone()
                };
                out.push_str(&format!("  {}: {}\n", control.label, shown));
            }
            Widget::MultiSelect { options } => {
                out.push_str(&format!("  {}:\n", control.label));
                for (n, option) in options.iter().enumerate() {
                    let mark = if option.selected { 'x' } else { ' ' };
                    out.push_str(&format!("    [{mark}] {}. {}\n", n + 1, option.value));
                }
            }
        }
    }
    out
}

/// Resolve a comma separated answer to option values. Entries may be
/// 1-based positions or literal option values; anything else is skipped.
pub fn parse_selection(answer: &str, options: &[String]) -> Vec<String> {
    answer
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse::<usize>() {
            Ok(n) if n >= 1 && n <= options.len() => Some(options[n - 1].clone()),
            _ => options.iter().find(|o| o.as_str() == part).cloned(),
        })
        .collect()
}

/// Interactive loop over an input line stream.
pub struct Console<R, W> {
    queue: Arc<ApprovalQueue>,
    input: Lines<R>,
    out: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(queue: Arc<ApprovalQueue>, input: R, out: W) -> Self {
        Self {
            queue,
            input: input.lines(),
            out,
        }
    }

    /// Run until `quit` or end of input.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        writeln!(self.out, "{}", render_queue(&self.queue.view()))?;
        writeln!(self.out, "type `help` for commands")?;
        loop {
            write!(self.out, "> ")?;
            self.out.flush()?;
            let Some(line) = self.input.next_line().await? else {
                break;
            };
            match parse_command(&line) {
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command).await?,
                Ok(None) => {}
                Err(e) => writeln!(self.out, "{e}")?,
            }
        }
        tracing::debug!("console finished");
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::List => writeln!(self.out, "{}", render_queue(&self.queue.view()))?,
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Quit => {}
            Command::Show(n) => {
                if let Some(entry) = self.pick(n)? {
                    let form = DynamicForm::new(entry.schema.clone(), Some(&entry.id), |_| {});
                    writeln!(self.out, "{}", headline(&entry))?;
                    write!(self.out, "{}", render_controls(&form.render()))?;
                }
            }
            Command::Approve(n) => {
                if let Some(entry) = self.pick(n)? {
                    let Some(values) = self.fill_form(&entry).await? else {
                        writeln!(self.out, "\ninput ended, {} left pending", entry.id)?;
                        return Ok(());
                    };
                    match self.queue.approve(&entry.id, values) {
                        Ok(_) => writeln!(self.out, "approved {}", entry.id)?,
                        Err(e) => writeln!(self.out, "{e}")?,
                    }
                }
            }
            Command::Reject(n) => {
                if let Some(entry) = self.pick(n)? {
                    match self.queue.reject(&entry.id) {
                        Ok(_) => writeln!(self.out, "rejected {}", entry.id)?,
                        Err(e) => writeln!(self.out, "{e}")?,
                    }
                }
            }
        }
        Ok(())
    }

    fn pick(&mut self, n: usize) -> anyhow::Result<Option<PendingApproval>> {
        let entry = match self.queue.view() {
            QueueView::Pending(entries) => entries.into_iter().nth(n - 1),
            QueueView::Empty => None,
        };
        if entry.is_none() {
            writeln!(self.out, "no approval numbered {n}")?;
        }
        Ok(entry)
    }

    /// Prompt for every control; a blank answer leaves the field untouched.
    /// Returns `None` when input ends before the form is complete.
    async fn fill_form(&mut self, entry: &PendingApproval) -> anyhow::Result<Option<FormValues>> {
        let submitted: Arc<Mutex<Option<FormValues>>> = Arc::new(Mutex::new(None));
        let slot = submitted.clone();
        let mut form = DynamicForm::new(entry.schema.clone(), Some(&entry.id), move |values| {
            if let Ok(mut slot) = slot.lock() {
                *slot = Some(values);
            }
        });

        writeln!(self.out, "{}", headline(entry))?;
        for control in form.render() {
            match &control.widget {
                Widget::SingleLine { .. } | Widget::MultiLine { .. } => {
                    let Some(answer) = self.prompt(&format!("{}: ", control.label)).await? else {
                        return Ok(None);
                    };
                    if !answer.is_empty() {
                        if let Err(e) = form.set_text(&control.key, answer) {
                            writeln!(self.out, "{e}")?;
                        }
                    }
                }
                Widget::MultiSelect { options } => {
                    let values: Vec<String> = options.iter().map(|o| o.value.clone()).collect();
                    for (n, value) in values.iter().enumerate() {
                        writeln!(self.out, "    {}. {}", n + 1, value)?;
                    }
                    loop {
                        let Some(answer) = self
                            .prompt(&format!("{} (comma separated): ", control.label))
                            .await?
                        else {
                            return Ok(None);
                        };
                        if answer.is_empty() {
                            break;
                        }
                        match form.set_selection(&control.key, &parse_selection(&answer, &values)) {
                            Ok(()) => break,
                            Err(e) => writeln!(self.out, "{e}, try again or leave blank")?,
                        }
                    }
                }
            }
        }

        let mut event = SubmitEvent::new();
        form.submit(&mut event);
        let values = submitted
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .unwrap_or_default();
        Ok(Some(values))
    }

    /// Next trimmed answer, or `None` at end of input.
    async fn prompt(&mut self, question: &str) -> anyhow::Result<Option<String>> {
        write!(self.out, "{question}")?;
        self.out.flush()?;
        let line = self.input.next_line().await?;
        Ok(line.map(|l| l.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::mock::MockAgentFeed;
    use hitl_protocol::schema::{self, EXAMPLE_REQUEST_ID};
    use serde_json::json;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("  "), Ok(None));
        assert_eq!(parse_command("list"), Ok(Some(Command::List)));
        assert_eq!(parse_command("Approve 2"), Ok(Some(Command::Approve(2))));
        assert_eq!(parse_command("r 1"), Ok(Some(Command::Reject(1))));
        assert_eq!(
            parse_command("approve"),
            Err(CommandError::MissingIndex("approve"))
        );
        assert_eq!(
            parse_command("reject 0"),
            Err(CommandError::BadIndex("0".to_string()))
        );
        assert_eq!(
            parse_command("deploy"),
            Err(CommandError::Unknown("deploy".to_string()))
        );
    }

    #[test]
    fn test_render_empty_queue() {
        assert_eq!(render_queue(&QueueView::Empty), EMPTY_QUEUE_MESSAGE);
    }

    #[test]
    fn test_render_queue_lists_files() {
        let feed = Arc::new(MockAgentFeed::new());
        let queue = ApprovalQueue::new(feed);
        queue.enqueue(schema::example_action_request());
        let text = render_queue(&queue.view());
        assert!(text.starts_with("[1] Approve file write to src/main.py <example_approval_1>"));
    }

    #[test]
    fn test_parse_selection() {
        let options = vec!["a.rs".to_string(), "b.rs".to_string()];
        assert_eq!(parse_selection("2, a.rs", &options), vec!["b.rs", "a.rs"]);
        assert_eq!(parse_selection("3, c.rs,", &options), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_approve_through_console() {
        let feed = Arc::new(MockAgentFeed::new());
        let queue = Arc::new(ApprovalQueue::seeded_with_example(feed.clone()));
        let input: &[u8] = b"show 1\napprove 1\nadds logging\n2\nlist\nquit\n";
        let mut out = Vec::new();

        Console::new(queue.clone(), input, &mut out).run().await.unwrap();

        let sent = feed.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].payload,
            Some(json!({
                "approval_id": EXAMPLE_REQUEST_ID,
                "approved": true,
                "values": {"files": ["src/utils.py"], "summary": "adds logging"}
            }))
        );
        assert!(queue.is_empty());
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Summary of change"));
        assert!(printed.trim_end().ends_with(&format!("{EMPTY_QUEUE_MESSAGE}\n>")));
    }

    #[tokio::test]
    async fn test_input_ending_mid_form_sends_nothing() {
        let feed = Arc::new(MockAgentFeed::new());
        let queue = Arc::new(ApprovalQueue::seeded_with_example(feed.clone()));
        let input: &[u8] = b"approve 1\n";
        let mut out = Vec::new();

        Console::new(queue.clone(), input, &mut out).run().await.unwrap();

        assert!(feed.sent().is_empty());
        assert!(queue.get(EXAMPLE_REQUEST_ID).is_some());
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("input ended, example_approval_1 left pending"));
    }

    #[tokio::test]
    async fn test_rejected_selection_is_asked_again() {
        let feed = Arc::new(MockAgentFeed::new());
        let queue = Arc::new(ApprovalQueue::new(feed.clone()));
        queue.enqueue(hitl_protocol::ActionRequest {
            request_id: Some("req-7".to_string()),
            ui_schema: Some(json!({
                "title": "Pick",
                "fields": [
                    {"type": "multi-select", "key": "files", "label": "First", "options": ["a.rs"]},
                    {"type": "multi-select", "key": "files", "label": "Second", "options": ["b.rs"]}
                ]
            })),
            ..Default::default()
        });
        // "1" on the first control resolves to a.rs, which the shared key rejects
        let input: &[u8] = b"approve 1\n1\n\n1\nquit\n";
        let mut out = Vec::new();

        Console::new(queue.clone(), input, &mut out).run().await.unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("`a.rs` is not an option of `files`, try again or leave blank"));
        assert!(printed.contains("approved req-7"));
        assert_eq!(
            feed.sent()[0].payload,
            Some(json!({"approval_id": "req-7", "approved": true, "values": {"files": ["b.rs"]}}))
        );
    }

    #[tokio::test]
    async fn test_reject_and_bad_index() {
        let feed = Arc::new(MockAgentFeed::new());
        let queue = Arc::new(ApprovalQueue::new(feed.clone()));
        queue.attach();
        feed.emit(hitl_protocol::AgentEvent::decode(
            hitl_protocol::EventKind::ActionRequest,
            json!({"request_id": "req-1", "ui_schema": {"title": "T", "fields": []}}),
        ));
        let input: &[u8] = b"reject 4\nreject 1\n";
        let mut out = Vec::new();

        Console::new(queue.clone(), input, &mut out).run().await.unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("no approval numbered 4"));
        assert!(printed.contains("rejected req-1"));
        assert_eq!(
            feed.sent()[0].payload,
            Some(json!({"approval_id": "req-1", "approved": false}))
        );
    }
}
