use shared::domain::{ConversationId, MessageId, UserId};

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Show,
    Open(ConversationId),
    Say(String),
    React(MessageId, String),
    Unreact(MessageId),
    Edit(MessageId, String),
    Delete(MessageId),
    Pin(MessageId, bool),
    CreateGroup(String, Vec<UserId>),
    Join(ConversationId),
    Leave(ConversationId),
    Add(ConversationId, Vec<UserId>),
    Remove(ConversationId, Vec<UserId>),
    DeleteGroup(ConversationId),
    Help,
    Quit,
}

pub const HELP: &str = "\
/list                      conversations
/open <id>                 make a conversation active
/show                      messages of the active conversation
/react <msg> <emoji>       /unreact <msg>
/edit <msg> <text>         /delete <msg>
/pin <msg>                 /unpin <msg>
/group <name> <u1,u2>      create a group
/join <g>  /leave <g>      /delgroup <g>
/add <g> <u1,u2>           /remove <g> <u1,u2>
/quit
anything else is sent to the active conversation";

pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };
    let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();
    let (first, tail) = args.split_once(' ').unwrap_or((args, ""));
    let tail = tail.trim();

    let need = |value: &str, what: &str| {
        if value.is_empty() {
            Err(format!("/{name}: missing {what}"))
        } else {
            Ok(value.to_string())
        }
    };

    Ok(match name {
        "list" => Command::List,
        "show" => Command::Show,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "open" => Command::Open(ConversationId::new(need(first, "conversation id")?)),
        "react" => Command::React(MessageId::new(need(first, "message id")?), need(tail, "emoji")?),
        "unreact" => Command::Unreact(MessageId::new(need(first, "message id")?)),
        "edit" => Command::Edit(MessageId::new(need(first, "message id")?), need(tail, "text")?),
        "delete" => Command::Delete(MessageId::new(need(first, "message id")?)),
        "pin" => Command::Pin(MessageId::new(need(first, "message id")?), true),
        "unpin" => Command::Pin(MessageId::new(need(first, "message id")?), false),
        "group" => Command::CreateGroup(need(first, "group name")?, users(tail)),
        "join" => Command::Join(ConversationId::new(need(first, "group id")?)),
        "leave" => Command::Leave(ConversationId::new(need(first, "group id")?)),
        "delgroup" => Command::DeleteGroup(ConversationId::new(need(first, "group id")?)),
        "add" => Command::Add(ConversationId::new(need(first, "group id")?), users(tail)),
        "remove" => Command::Remove(ConversationId::new(need(first, "group id")?), users(tail)),
        other => return Err(format!("unknown command /{other}; try /help")),
    })
}

fn users(list: &str) -> Vec<UserId> {
    list.split(',')
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(UserId::new)
        .collect()
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
