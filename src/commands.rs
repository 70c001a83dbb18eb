//! Built-in command table and trigger matching.
//!
//! A command fires when its trigger phrase appears anywhere in the input,
//! ignoring case. Entries are checked in registration order and the first
//! hit wins.

use std::fmt;
use std::sync::Arc;

use crate::actions::DesktopActions;
use crate::error::ActionError;

type Action = Arc<dyn Fn() -> Result<String, ActionError> + Send + Sync>;

/// A trigger phrase bound to a zero-argument action.
#[derive(Clone)]
pub struct Command {
    trigger: String,
    action: Action,
}

impl Command {
    pub fn new<F>(trigger: &str, action: F) -> Self
    where
        F: Fn() -> Result<String, ActionError> + Send + Sync + 'static,
    {
        Self {
            trigger: trigger.to_lowercase(),
            action: Arc::new(action),
        }
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// Execute the bound action. May block.
    pub fn run(&self) -> Result<String, ActionError> {
        (self.action)()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: Vec<Command>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// The four desktop commands, in their fixed order.
    pub fn builtin(actions: Arc<dyn DesktopActions>, browser_url: &str) -> Self {
        let mut table = Self::new();

        let fm = Arc::clone(&actions);
        table.register(Command::new("open file manager", move || {
            fm.open_file_browser()?;
            Ok("File Manager opened.".to_string())
        }));

        let browser = Arc::clone(&actions);
        let url = browser_url.to_string();
        table.register(Command::new("open browser", move || {
            browser.open_url(&url)?;
            Ok("Opened".to_string())
        }));

        let screen = Arc::clone(&actions);
        table.register(Command::new("take screenshot", move || {
            let filename = screen.capture_screen()?;
            Ok(format!("Saved: {filename}"))
        }));

        table.register(Command::new("show system info", move || {
            let load = actions.read_system_load()?;
            Ok(format!(
                "CPU: {:.1}% RAM: {:.1}%",
                load.cpu_percent, load.mem_percent
            ))
        }));

        table
    }

    /// First command whose trigger is contained in `input`, case-insensitively.
    pub fn find(&self, input: &str) -> Option<&Command> {
        let input = input.to_lowercase();
        self.commands
            .iter()
            .find(|command| input.contains(&command.trigger))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::SystemLoad;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDesktop {
        calls: Mutex<Vec<String>>,
    }

    impl FakeDesktop {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl DesktopActions for FakeDesktop {
        fn open_file_browser(&self) -> Result<(), ActionError> {
            self.record("file_browser");
            Ok(())
        }

        fn open_url(&self, url: &str) -> Result<(), ActionError> {
            self.record(format!("url {url}"));
            Ok(())
        }

        fn capture_screen(&self) -> Result<String, ActionError> {
            self.record("screen");
            Ok("screenshot_20240101_120000.png".into())
        }

        fn read_system_load(&self) -> Result<SystemLoad, ActionError> {
            self.record("load");
            Ok(SystemLoad {
                cpu_percent: 12.5,
                mem_percent: 40.0,
            })
        }
    }

    fn fixed(trigger: &str) -> Command {
        let reply = trigger.to_string();
        Command::new(trigger, move || Ok(reply.clone()))
    }

    #[test]
    fn first_registered_match_wins() {
        let mut table = CommandTable::new();
        table.register(fixed("open"));
        table.register(fixed("open browser"));

        let hit = table.find("please open browser now").unwrap();
        assert_eq!(hit.trigger(), "open");
    }

    #[test]
    fn absent_trigger_is_skipped() {
        let mut table = CommandTable::new();
        table.register(fixed("open file manager"));
        table.register(fixed("open browser"));

        let hit = table.find("please open browser now").unwrap();
        assert_eq!(hit.trigger(), "open browser");
    }

    #[test]
    fn matching_ignores_case_on_both_sides() {
        let mut table = CommandTable::new();
        table.register(fixed("Take Screenshot"));

        assert!(table.find("Could you TAKE screenshot please").is_some());
    }

    #[test]
    fn no_trigger_means_no_match() {
        let table = CommandTable::builtin(Arc::new(FakeDesktop::default()), "https://example.com");
        assert!(table.find("tell me a joke").is_none());
        assert!(table.find("").is_none());
    }

    #[test]
    fn builtin_table_order_and_replies() {
        let desktop = Arc::new(FakeDesktop::default());
        let table = CommandTable::builtin(desktop.clone(), "https://example.com");
        assert_eq!(table.len(), 4);

        let reply = table.find("open file manager").unwrap().run().unwrap();
        assert_eq!(reply, "File Manager opened.");

        let reply = table.find("open browser please").unwrap().run().unwrap();
        assert_eq!(reply, "Opened");

        let reply = table.find("Could you take screenshot please").unwrap().run().unwrap();
        assert_eq!(reply, "Saved: screenshot_20240101_120000.png");

        let reply = table.find("show system info").unwrap().run().unwrap();
        assert_eq!(reply, "CPU: 12.5% RAM: 40.0%");

        let calls = desktop.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec!["file_browser", "url https://example.com", "screen", "load"]
        );
    }

    #[test]
    fn action_failure_surfaces_from_run() {
        let command = Command::new("boom", || Err(ActionError::NoHomeDir));
        let err = command.run().unwrap_err();
        assert_eq!(err.to_string(), "no home directory");
    }
}
