//! Operator command surface.
//!
//! Commands start with `#`. Anything else is free text that the agent
//! classifies before routing.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddTask(String),
    TaskList,
    Sleep,
    NewDay,
    DevMode,
    ChatMode,
    Clear,
    Status,
    /// Free text (including unknown `#` words).
    Chat(String),
}

impl Command {
    pub fn parse(input: &str) -> Self {
        let text = input.trim();
        let Some(rest) = text.strip_prefix('#') else {
            return Command::Chat(text.to_string());
        };

        let (word, arg) = match rest.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (rest, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "addtask" if !arg.is_empty() => Command::AddTask(arg.to_string()),
            "tasklist" => Command::TaskList,
            "sleep" => Command::Sleep,
            "newday" => Command::NewDay,
            "devmode" => Command::DevMode,
            "chatmode" => Command::ChatMode,
            "clear" => Command::Clear,
            "status" => Command::Status,
            _ => Command::Chat(text.to_string()),
        }
    }
}

pub const HELP_TEXT: &str = "Commands: #addtask <text>, #tasklist, #sleep, #newday, \
#devmode, #chatmode, #clear, #status";
