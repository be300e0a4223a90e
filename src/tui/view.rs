use anyhow::Result;
use crossterm::{
    cursor, execute, queue,
    style::{Color, ResetColor, SetForegroundColor},
    terminal::{self, ClearType},
};
use std::io::{self, Write};

use crate::tui::state::{Screen, Status, build_render_plan};

pub struct TuiApp {
    pub title: String,
    pub input: String,
    pub log: Vec<String>,
    pub screen: Screen,
    pub status: Status,
    pub identity: Option<String>,
    pub(crate) handler: Option<Box<dyn crate::tui::commands::CommandHandler + Send>>,
    pub(crate) inbox_rx: Option<std::sync::mpsc::Receiver<String>>,
    pub(crate) inbox_tx: Option<std::sync::mpsc::Sender<String>>,
    pub max_log_lines: usize,
}

impl TuiApp {
    pub fn new(title: impl Into<String>) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        Self {
            title: title.into(),
            input: String::new(),
            log: Vec::new(),
            screen: Screen::Login,
            status: Status::Idle,
            identity: None,
            handler: None,
            inbox_rx: Some(rx),
            inbox_tx: Some(tx),
            max_log_lines: 500,
        }
    }

    pub fn with_handler(mut self, h: Box<dyn crate::tui::commands::CommandHandler + Send>) -> Self {
        self.handler = Some(h);
        self
    }

    pub fn sender(&self) -> Option<std::sync::mpsc::Sender<String>> {
        self.inbox_tx.clone()
    }

    pub fn push_log<S: Into<String>>(&mut self, s: S) {
        self.log.push(s.into());
        if self.log.len() > self.max_log_lines {
            let overflow = self.log.len() - self.max_log_lines;
            self.log.drain(0..overflow);
        }
    }

    /// Background tasks talk to the view through inbox messages. A small set
    /// of `::`-prefixed control messages updates status, screen and identity;
    /// everything else lands in the log.
    fn drain_inbox(&mut self) {
        let mut drained = Vec::new();
        if let Some(rx) = self.inbox_rx.as_ref() {
            while let Ok(msg) = rx.try_recv() {
                drained.push(msg);
            }
        }
        for msg in drained {
            match msg.as_str() {
                "::status:done" => self.status = Status::Done,
                "::status:cancelled" => self.status = Status::Cancelled,
                "::status:working" => self.status = Status::Working,
                "::status:error" => self.status = Status::Error,
                "::status:idle" => self.status = Status::Idle,
                "::identity:clear" => {
                    self.identity = None;
                    self.screen = Screen::Login;
                }
                _ if msg.starts_with("::identity:") => {
                    self.identity = Some(msg["::identity:".len()..].to_string());
                }
                _ if msg.starts_with("::screen:") => {
                    if let Some(screen) = Screen::from_tag(&msg["::screen:".len()..]) {
                        self.screen = screen;
                    }
                }
                _ => self.push_log(msg),
            }
        }
    }

    pub fn run(&mut self) -> Result<()> {
        struct TuiGuard;
        impl Drop for TuiGuard {
            fn drop(&mut self) {
                let mut stdout = io::stdout();
                let _ = execute!(stdout, terminal::LeaveAlternateScreen, cursor::Show);
                let _ = terminal::disable_raw_mode();
            }
        }
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        execute!(stdout, terminal::EnterAlternateScreen, cursor::Hide)?;
        let _guard = TuiGuard;
        self.event_loop()
    }

    fn event_loop(&mut self) -> Result<()> {
        let mut last_ctrl_c_at: Option<std::time::Instant> = None;
        loop {
            self.drain_inbox();
            self.draw()?;
            if crossterm::event::poll(std::time::Duration::from_millis(50))? {
                match crossterm::event::read()? {
                    crossterm::event::Event::Key(k) => match k.code {
                        // Handle Ctrl+C before generic Char(c) to avoid being shadowed
                        crossterm::event::KeyCode::Char('c')
                            if k.modifiers
                                .contains(crossterm::event::KeyModifiers::CONTROL) =>
                        {
                            let now = std::time::Instant::now();
                            if let Some(prev) = last_ctrl_c_at
                                && now.duration_since(prev) <= std::time::Duration::from_secs(3)
                            {
                                return Ok(());
                            }
                            last_ctrl_c_at = Some(now);
                            self.dispatch("/cancel");
                            self.push_log("[Press Ctrl+C again within 3s to exit]");
                        }
                        crossterm::event::KeyCode::Esc => {
                            self.dispatch("/cancel");
                        }
                        crossterm::event::KeyCode::Enter => {
                            let line = std::mem::take(&mut self.input);
                            if line.trim() == "/quit" {
                                return Ok(());
                            }
                            self.dispatch(&line);
                        }
                        crossterm::event::KeyCode::Backspace => {
                            self.input.pop();
                        }
                        crossterm::event::KeyCode::Char(c) => {
                            self.input.push(c);
                        }
                        _ => {}
                    },
                    crossterm::event::Event::Resize(_, _) => {}
                    _ => {}
                }
            }
        }
    }

    fn dispatch(&mut self, line: &str) {
        if let Some(mut handler) = self.handler.take() {
            handler.handle(line, self);
            self.handler = Some(handler);
        } else {
            self.push_log(format!("> {line}"));
        }
    }

    fn draw(&self) -> Result<()> {
        let mut stdout = io::stdout();
        let (w, h) = terminal::size()?;
        let plan = build_render_plan(
            &self.title,
            self.screen,
            self.status,
            &self.log,
            &self.input,
            w,
            h,
            self.identity.as_deref(),
        );
        queue!(
            stdout,
            terminal::Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        if let Some(first) = plan.header_lines.first() {
            queue!(stdout, SetForegroundColor(Color::Cyan))?;
            write!(stdout, "{first}")?;
            queue!(stdout, ResetColor)?;
        }
        if let Some(second) = plan.header_lines.get(1) {
            queue!(stdout, SetForegroundColor(Color::DarkGrey))?;
            write!(stdout, "{second}")?;
            queue!(stdout, ResetColor)?;
        }
        for line in &plan.log_lines {
            let cmp = line.trim_start_matches('\r').trim_end_matches('\n');
            if cmp.starts_with("> ") {
                queue!(stdout, SetForegroundColor(Color::Blue))?;
                write!(stdout, "{line}")?;
                queue!(stdout, ResetColor)?;
            } else if cmp.starts_with("[error]") || cmp.starts_with("[denied]") {
                queue!(stdout, SetForegroundColor(Color::Red))?;
                write!(stdout, "{line}")?;
                queue!(stdout, ResetColor)?;
            } else if cmp.starts_with("[ok]") {
                queue!(stdout, SetForegroundColor(Color::Green))?;
                write!(stdout, "{line}")?;
                queue!(stdout, ResetColor)?;
            } else if cmp.starts_with('[') {
                queue!(stdout, SetForegroundColor(Color::DarkGrey))?;
                write!(stdout, "{line}")?;
                queue!(stdout, ResetColor)?;
            } else {
                write!(stdout, "{line}")?;
            }
        }
        queue!(
            stdout,
            cursor::MoveTo(0, h.saturating_sub(1)),
            terminal::Clear(ClearType::CurrentLine)
        )?;
        write!(stdout, "{}", plan.input_line)?;
        stdout.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_control_messages_update_state() {
        let mut app = TuiApp::new("mivna");
        let tx = app.sender().unwrap();
        tx.send("::status:working".to_string()).unwrap();
        tx.send("::identity:a@b.c".to_string()).unwrap();
        tx.send("::screen:dashboard".to_string()).unwrap();
        tx.send("[ok] signed in".to_string()).unwrap();
        app.drain_inbox();

        assert_eq!(app.status, Status::Working);
        assert_eq!(app.identity.as_deref(), Some("a@b.c"));
        assert_eq!(app.screen, Screen::Dashboard);
        assert_eq!(app.log, vec!["[ok] signed in".to_string()]);
    }

    #[test]
    fn identity_clear_returns_to_login() {
        let mut app = TuiApp::new("mivna");
        app.identity = Some("a@b.c".to_string());
        app.screen = Screen::Billing;
        let tx = app.sender().unwrap();
        tx.send("::identity:clear".to_string()).unwrap();
        app.drain_inbox();
        assert!(app.identity.is_none());
        assert_eq!(app.screen, Screen::Login);
    }

    #[test]
    fn log_is_bounded() {
        let mut app = TuiApp::new("mivna");
        app.max_log_lines = 10;
        for i in 0..25 {
            app.push_log(format!("line {i}"));
        }
        assert_eq!(app.log.len(), 10);
        assert_eq!(app.log[0], "line 15");
    }
}
