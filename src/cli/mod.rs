use std::io::{self, Write};

pub fn print_help() {
    println!(
        "/login <email> <pw>   Sign in\n\
/signup <email> <pw>  Create an account\n\
/logout               Sign out\n\
/repos                List connected repositories\n\
/connect <owner/name> Connect a repository\n\
/disconnect <owner/name>\n\
/diagram <owner/name> <flowchart|erd|sequence|component>\n\
/readme <owner/name>  Generate or show the README\n\
/orgs                 List your organizations\n\
/pricing              Show plans\n\
/clear Clear screen\n/quit  Quit"
    );
}

/// Commands handled locally without touching the backend. Returns
/// `Some(true)` when the loop should exit, `Some(false)` when the line was
/// consumed here, `None` when it belongs to the backend dispatcher.
pub fn handle_command(line: &str) -> Option<bool> {
    match line.trim() {
        "/help" => {
            print_help();
            Some(false)
        }
        "/clear" => {
            print!("\x1B[2J\x1B[H");
            let _ = io::stdout().flush();
            Some(false)
        }
        "/quit" | "/exit" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_and_exit_terminate() {
        assert_eq!(handle_command("/quit"), Some(true));
        assert_eq!(handle_command("/exit"), Some(true));
        assert_eq!(handle_command(" /quit "), Some(true));
    }

    #[test]
    fn local_commands_are_consumed_without_quitting() {
        assert_eq!(handle_command("/help"), Some(false));
        assert_eq!(handle_command("/clear"), Some(false));
    }

    #[test]
    fn backend_commands_fall_through() {
        assert_eq!(handle_command("/repos"), None);
        assert_eq!(handle_command("/login a@b.c pw"), None);
        assert_eq!(handle_command("hello"), None);
    }
}
