use unicode_width::UnicodeWidthChar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Working,
    Cancelled,
    Done,
    Error,
}

/// Which page of the app is showing. One screen per page of the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Login,
    Dashboard,
    DiagramViewer,
    ReadmeViewer,
    TeamSettings,
    Billing,
    Pricing,
}

impl Screen {
    pub fn title(&self) -> &'static str {
        match self {
            Screen::Login => "Login",
            Screen::Dashboard => "Dashboard",
            Screen::DiagramViewer => "Diagram",
            Screen::ReadmeViewer => "README",
            Screen::TeamSettings => "Team",
            Screen::Billing => "Billing",
            Screen::Pricing => "Pricing",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "login" => Some(Screen::Login),
            "dashboard" => Some(Screen::Dashboard),
            "diagram" => Some(Screen::DiagramViewer),
            "readme" => Some(Screen::ReadmeViewer),
            "team" => Some(Screen::TeamSettings),
            "billing" => Some(Screen::Billing),
            "pricing" => Some(Screen::Pricing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPlan {
    pub header_lines: Vec<String>,
    pub log_lines: Vec<String>,
    pub input_line: String,
}

pub fn truncate_display(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    let mut width = 0usize;
    let mut out = String::new();
    for ch in s.chars() {
        let ch_w = ch.width().unwrap_or(0);
        if ch_w == 0 {
            out.push(ch);
            continue;
        }
        if width + ch_w > max {
            break;
        }
        out.push(ch);
        width += ch_w;
    }
    out
}

pub fn build_render_plan(
    title: &str,
    screen: Screen,
    status: Status,
    log: &[String],
    input: &str,
    w: u16,
    h: u16,
    identity: Option<&str>,
) -> RenderPlan {
    let w_usize = w as usize;
    let status_str = match status {
        Status::Idle => "Idle",
        Status::Working => "Working",
        Status::Cancelled => "Cancelled",
        Status::Done => "Done",
        Status::Error => "Error",
    };
    let identity = identity.unwrap_or("");
    let title_full = if identity.is_empty() {
        format!("{title} — {} [{status_str}]", screen.title())
    } else {
        format!("{title} — {} [{status_str}]  {identity}", screen.title())
    };
    let title_trim = truncate_display(&title_full, w_usize);
    let sep = "-".repeat(w_usize);
    let header_lines = vec![format!("\r{}\n", title_trim), format!("\r{}\n", sep)];

    let max_log_rows = h.saturating_sub(3) as usize;
    let start = log.len().saturating_sub(max_log_rows);
    let mut log_lines = Vec::new();
    for line in &log[start..] {
        let line = line.trim_end_matches('\n');
        log_lines.push(format!("\r{}\n", truncate_display(line, w_usize)));
    }

    let input_prompt = if input.is_empty() {
        "> ".to_string()
    } else {
        format!("> {input}")
    };
    let input_trim = truncate_display(&input_prompt, w_usize);
    let input_line = format!("\r{input_trim}");

    RenderPlan {
        header_lines,
        log_lines,
        input_line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_shows_screen_status_and_identity() {
        let plan = build_render_plan(
            "mivna",
            Screen::Dashboard,
            Status::Idle,
            &[],
            "",
            120,
            24,
            Some("a@b.c"),
        );
        assert!(plan.header_lines[0].contains("Dashboard"));
        assert!(plan.header_lines[0].contains("[Idle]"));
        assert!(plan.header_lines[0].contains("a@b.c"));
    }

    #[test]
    fn log_keeps_only_what_fits() {
        let log: Vec<String> = (0..50).map(|i| format!("line {i}")).collect();
        let plan = build_render_plan(
            "mivna",
            Screen::Dashboard,
            Status::Idle,
            &log,
            "",
            80,
            10,
            None,
        );
        // Three rows reserved for header and input.
        assert_eq!(plan.log_lines.len(), 7);
        assert!(plan.log_lines.last().unwrap().contains("line 49"));
    }

    #[test]
    fn truncate_respects_display_width() {
        assert_eq!(truncate_display("hello", 3), "hel");
        assert_eq!(truncate_display("hello", 0), "");
        assert_eq!(truncate_display("héllo", 5), "héllo");
    }

    #[test]
    fn screen_tags_round_trip() {
        for screen in [
            Screen::Login,
            Screen::Dashboard,
            Screen::DiagramViewer,
            Screen::ReadmeViewer,
            Screen::TeamSettings,
            Screen::Billing,
            Screen::Pricing,
        ] {
            let tag = match screen {
                Screen::Login => "login",
                Screen::Dashboard => "dashboard",
                Screen::DiagramViewer => "diagram",
                Screen::ReadmeViewer => "readme",
                Screen::TeamSettings => "team",
                Screen::Billing => "billing",
                Screen::Pricing => "pricing",
            };
            assert_eq!(Screen::from_tag(tag), Some(screen));
        }
        assert_eq!(Screen::from_tag("nope"), None);
    }

    #[test]
    fn input_line_has_prompt() {
        let plan = build_render_plan(
            "mivna",
            Screen::Login,
            Status::Idle,
            &[],
            "/login a@b.c",
            80,
            24,
            None,
        );
        assert_eq!(plan.input_line, "\r> /login a@b.c");
    }
}
