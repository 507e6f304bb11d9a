use uuid::Uuid;

use parley_types::api::DeleteOptions;

/// One line of REPL input. Message references are 1-based positions in the
/// last printed listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    /// Park composer text without sending it.
    Draft(String),
    List,
    Older,
    Edit { index: usize, text: String },
    Delete { index: usize, options: DeleteOptions },
    Undo,
    Dismiss,
    React { index: usize, emoji: String },
    Pin { index: usize, pinned: bool },
    Thread { index: usize },
    Reply { index: usize, text: String },
    Jump { index: usize },
    Switch(Uuid),
    NewChannel(String),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  <text>                         send a message
  /draft <text>                  save text as the channel draft
  /list                          reprint the channel
  /older                         load older messages
  /edit N <text>                 edit message N
  /delete N [soft|hard] [reason] delete message N
  /undo                          undo the pending delete
  /dismiss                       close the toast
  /react N <emoji>               toggle a reaction
  /pin N, /unpin N               pin or unpin
  /thread N                      show replies to N
  /reply N <text>                reply in N's thread
  /jump N                        highlight message N
  /switch <channel-id>           open another channel
  /new <name>                    create a channel and open it
  /quit";

pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "list" => Command::List,
        "older" => Command::Older,
        "undo" => Command::Undo,
        "dismiss" => Command::Dismiss,
        "edit" => {
            let (index, text) = index_and_text(args)?;
            Command::Edit { index, text }
        }
        "reply" => {
            let (index, text) = index_and_text(args)?;
            Command::Reply { index, text }
        }
        "react" => {
            let (index, emoji) = index_and_text(args)?;
            Command::React { index, emoji }
        }
        "delete" => parse_delete(args)?,
        "pin" => Command::Pin { index: index(args)?, pinned: true },
        "unpin" => Command::Pin { index: index(args)?, pinned: false },
        "thread" => Command::Thread { index: index(args)? },
        "jump" => Command::Jump { index: index(args)? },
        "switch" => Command::Switch(Uuid::parse_str(args).map_err(|_| format!("not a channel id: {args}"))?),
        "draft" => Command::Draft(args.to_string()),
        "new" => {
            if args.is_empty() {
                return Err("usage: /new <name>".into());
            }
            Command::NewChannel(args.to_string())
        }
        other => return Err(format!("unknown command /{other}, try /help")),
    };
    Ok(Some(command))
}

fn index(arg: &str) -> Result<usize, String> {
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected a message number, got '{arg}'")),
    }
}

fn index_and_text(args: &str) -> Result<(usize, String), String> {
    let (n, text) = args
        .split_once(char::is_whitespace)
        .ok_or_else(|| "expected a message number and text".to_string())?;
    let text = text.trim();
    if text.is_empty() {
        return Err("expected a message number and text".into());
    }
    Ok((index(n)?, text.to_string()))
}

fn parse_delete(args: &str) -> Result<Command, String> {
    let mut parts = args.splitn(3, char::is_whitespace);
    let index = index(parts.next().unwrap_or(""))?;
    let mut options = DeleteOptions::soft();
    let mut reason = Vec::new();
    for part in parts {
        match part {
            "soft" if reason.is_empty() => options = DeleteOptions::soft(),
            "hard" if reason.is_empty() => options = DeleteOptions::hard(),
            other => reason.push(other.trim()),
        }
    }
    let reason = reason.join(" ");
    if !reason.is_empty() {
        options = options.with_reason(reason);
    }
    Ok(Command::Delete { index, options })
}
