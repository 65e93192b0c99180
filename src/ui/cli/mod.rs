//! CLI - reedline-based REPL interface
//!
//! Drives the ptrace backend, forwards every lifecycle event to the query
//! session and exposes the query commands.

use std::borrow::Cow;
use std::io::{self, Write};

use anyhow::Result;
use colored::Colorize;
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};

use crate::app::{parse_command, surface, AppCommand};
use crate::config::Config;
use crate::core::call::{decode_argument, quote_c_string};
use crate::core::{BreakpointId, DebugControl, DebugError, LifecycleEvent};
use crate::debug::types::DebugStatus;
use crate::debug::{enumerate_processes, PlatformDebugger};
use crate::query::Session;

/// Prompt showing the target state
pub struct SqlpeekPrompt {
    status: DebugStatus,
    pid: Option<u32>,
}

impl SqlpeekPrompt {
    pub fn new() -> Self {
        Self {
            status: DebugStatus::Detached,
            pid: None,
        }
    }

    pub fn update(&mut self, status: DebugStatus, pid: Option<u32>) {
        self.status = status;
        self.pid = pid;
    }
}

impl Default for SqlpeekPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for SqlpeekPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        match self.pid {
            Some(pid) => Cow::Owned(format!("[{}:{}]", self.status, pid)),
            None => Cow::Owned(format!("[{}]", self.status)),
        }
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("(search: {}{}) ", prefix, history_search.term))
    }
}

/// Print the help message
fn print_help() {
    println!("{}", "sqlpeek Commands".bold().cyan());
    println!("{}", "═".repeat(50).cyan());

    println!("\n{}", "Process:".bold().yellow());
    println!("  {}  Launch a program (reuses the last one)", "run [PROG ARGS]".green());
    println!("  {}     Attach to a running process", "attach <pid>".green());
    println!("  {}               List processes", "ps".green());
    println!("  {}        Continue execution", "continue, c".green());
    println!("  {}           Detach from the process", "detach".green());
    println!("  {}             Kill the process", "kill".green());

    println!("\n{}", "Breakpoints:".bold().yellow());
    println!("  {}    Stop on entry to a function", "break <func>".green());
    println!("  {}      Delete a breakpoint", "delete <n>".green());
    println!("  {}      Enable a breakpoint", "enable <n>".green());
    println!("  {}     Disable a breakpoint", "disable <n>".green());
    println!("  {} List breakpoints", "info breakpoints".green());

    println!("\n{}", "SQLite:".bold().yellow());
    println!("  {}          Run a statement and print the rows", "sql <stmt>".green());
    println!("  {}       Run a statement, show the result text", "sqlstr <stmt>".green());
    println!("  {}  Run a statement at a location", "sqlat <loc> <stmt>".green());
    println!("  {}     Count the result rows (-1 on failure)", "sqlcount <stmt>".green());
    println!("  {}  Show or set the column separator", "separator [sep]".green());
    println!("  {}            Install the connection tracking hooks", "hooks".green());
    println!("  {}           Show session state", "status".green());

    println!("\n{}", "Other:".bold().yellow());
    println!("  {}                Show this help", "?".green());
    println!("  {}                Quit sqlpeek", "q".green());
}

fn print_error(err: &DebugError) {
    match err {
        DebugError::NotRunning => println!("{} Warning: {}", "[!]".yellow(), err),
        _ => println!("{} Error: {}", "[!]".red(), err),
    }
}

/// Interactive session over the platform debugger
pub struct Repl {
    session: Session<PlatformDebugger>,
    prompt: SqlpeekPrompt,
    /// Command line of the last `run`
    last_run: Vec<String>,
}

impl Repl {
    pub fn new(config: &Config) -> Self {
        Self {
            session: Session::new(PlatformDebugger::new(), config),
            prompt: SqlpeekPrompt::new(),
            last_run: Vec::new(),
        }
    }

    fn print_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Stopped(reason) => println!("[*] Stopped: {}", reason),
            LifecycleEvent::NewCodeLoaded => log::debug!("New code loaded"),
            LifecycleEvent::Exited { code: Some(code) } => {
                println!("[*] Process exited with code {}", code)
            }
            LifecycleEvent::Exited { code: None } => println!("[*] Process gone"),
        }
    }

    /// Print an event and hand it to the session
    fn announce(&mut self, event: &LifecycleEvent) {
        self.print_event(event);
        self.session.notify(event);
    }

    fn announce_all(&mut self, result: Result<Vec<LifecycleEvent>, DebugError>) {
        match result {
            Ok(events) => {
                for event in &events {
                    self.announce(event);
                }
            }
            Err(e) => print_error(&e),
        }
    }

    /// Announce what the backend queued without returning, e.g. the exit
    /// of a process replaced by a launch that then failed
    fn announce_queued(&mut self) {
        let events = self.session.sync_events();
        for event in &events {
            self.print_event(event);
        }
    }

    /// Resume until the target halts. Library loads on the way only give
    /// the session a chance to place its hooks.
    fn resume(&mut self) {
        loop {
            let result = self.session.control_mut().resume();
            let halted = match &result {
                Ok(events) => events.iter().any(|e| *e != LifecycleEvent::NewCodeLoaded),
                Err(_) => true,
            };
            self.announce_all(result);
            if halted {
                break;
            }
        }
    }

    /// Launch a program; an empty command line reruns the previous one
    pub fn launch(&mut self, command_line: Vec<String>) {
        let command_line = if command_line.is_empty() {
            self.last_run.clone()
        } else {
            command_line
        };
        let Some((program, args)) = command_line.split_first() else {
            println!("{} No program to run", "[!]".red());
            return;
        };

        println!("[*] Starting {}", command_line.join(" "));
        let result = self.session.control_mut().launch(program, args);
        self.announce_all(result);
        self.announce_queued();
        self.last_run = command_line;
    }

    pub fn attach(&mut self, pid: u32) {
        let result = self.session.control_mut().attach(pid);
        self.announce_all(result);
        self.announce_queued();
    }

    /// Breakpoint ids the user may touch
    fn require_user_breakpoint(&self, id: BreakpointId) -> bool {
        let known = self.session.control().breakpoints().iter().any(|bp| bp.id == id);
        if !known {
            println!("{} No breakpoint number {}", "[!]".red(), id);
        }
        known
    }

    fn toggle_breakpoint(&mut self, id: BreakpointId, enabled: bool) {
        if self.require_user_breakpoint(id) {
            if let Err(e) = self.session.control_mut().set_breakpoint_enabled(id, enabled) {
                print_error(&e);
            }
        }
    }

    fn print_breakpoints(&self) {
        let breakpoints = self.session.control().breakpoints();
        if breakpoints.is_empty() {
            println!("    {}", "No breakpoints.".dimmed());
            return;
        }
        println!("{:<5} {:<4} {:<18} {:<6} What", "Num", "Enb", "Address", "Hits");
        for bp in breakpoints {
            let address = if bp.address == 0 {
                "<pending>".to_string()
            } else {
                format!("{:#x}", bp.address)
            };
            let enabled = if bp.enabled { "y" } else { "n" };
            println!(
                "{:<5} {:<4} {:<18} {:<6} {}",
                bp.id, enabled, address, bp.hit_count, bp.location
            );
        }
    }

    fn print_status(&self) {
        let control = self.session.control();
        match control.attached_pid() {
            Some(pid) => println!("[*] Process:   {} ({})", pid, control.status()),
            None => println!("[*] Process:   {}", control.status()),
        }
        let helper = self.session.helper();
        let loaded = if helper.is_loaded() { "loaded" } else { "not loaded" };
        println!("[*] Helper:    {} ({})", helper.path().display(), loaded);
        let hooks = if self.session.tracker().is_installed() {
            "installed"
        } else {
            "not installed"
        };
        println!("[*] Hooks:     {}", hooks);
        println!("[*] Handle:    {}", self.session.current_handle());
    }

    /// Execute one command. Returns false when the REPL should end.
    fn execute(&mut self, cmd: AppCommand) -> Result<bool> {
        let stdout = io::stdout();
        let mut out = stdout.lock();

        match cmd {
            AppCommand::Run(command_line) => self.launch(command_line),
            AppCommand::Attach(pid) => self.attach(pid),
            AppCommand::Continue => self.resume(),
            AppCommand::Detach => {
                let result = self.session.control_mut().detach();
                self.announce_all(result);
            }
            AppCommand::Kill => {
                let result = self.session.control_mut().kill();
                self.announce_all(result);
            }
            AppCommand::Break(symbol) => match self.session.control_mut().set_user_breakpoint(&symbol) {
                Ok(id) => println!("[*] Breakpoint {} at {}", id, symbol),
                Err(e) => print_error(&e),
            },
            AppCommand::Delete(id) => {
                if self.require_user_breakpoint(id) {
                    if let Err(e) = self.session.control_mut().remove_breakpoint(id) {
                        print_error(&e);
                    }
                }
            }
            AppCommand::Enable(id) => self.toggle_breakpoint(id, true),
            AppCommand::Disable(id) => self.toggle_breakpoint(id, false),
            AppCommand::InfoBreakpoints => self.print_breakpoints(),
            AppCommand::Processes => {
                for process in enumerate_processes() {
                    println!("{:>7}  {}", process.pid, process.name);
                }
            }
            AppCommand::Sql(statement) => surface::sql(&mut self.session, &statement, &mut out)?,
            AppCommand::SqlString(statement) => {
                surface::sql_string(&mut self.session, &statement, &mut out)?
            }
            AppCommand::SqlAt { location, sql } => {
                surface::sql_at(&mut self.session, &location, &sql, &mut out)?
            }
            AppCommand::SqlCount(statement) => {
                surface::sql_count(&mut self.session, &statement, &mut out)?
            }
            AppCommand::Separator(None) => {
                println!("[*] Separator: {}", quote_c_string(self.session.separator()));
            }
            AppCommand::Separator(Some(separator)) => match decode_argument(&separator) {
                Ok(separator) => self.session.set_separator(separator),
                Err(e) => println!("{} Invalid separator: {}", "[!]".red(), e),
            },
            AppCommand::Hooks => {
                if !self.session.control().is_running() {
                    print_error(&DebugError::NotRunning);
                } else {
                    match self.session.install_hooks() {
                        Ok(()) => println!("[*] SQLite hooks installed"),
                        Err(e) => print_error(&e),
                    }
                }
            }
            AppCommand::Status => self.print_status(),
            AppCommand::Help => print_help(),
            AppCommand::Quit => {
                println!("[*] Shutting down...");
                return Ok(false);
            }
            AppCommand::Unknown(input) => {
                println!("{} Unknown command: '{}'", "[!]".red(), input);
                println!("    Type '?' for help");
            }
        }
        out.flush()?;
        self.announce_queued();
        Ok(true)
    }

    /// Run the REPL until quit or end of input
    pub fn run(mut self) -> Result<()> {
        let mut line_editor = Reedline::create();

        println!(
            "{}",
            "╔══════════════════════════════════════════════════════════════╗".cyan()
        );
        println!(
            "{}",
            "║  sqlpeek - Type '?' for help, 'q' to quit                    ║".cyan()
        );
        println!(
            "{}",
            "╚══════════════════════════════════════════════════════════════╝".cyan()
        );

        loop {
            let control = self.session.control();
            self.prompt.update(control.status(), control.attached_pid());

            let sig = line_editor.read_line(&self.prompt)?;
            match sig {
                Signal::Success(buffer) => {
                    let input = buffer.trim();
                    if input.is_empty() {
                        continue;
                    }

                    if !self.execute(parse_command(input))? {
                        break;
                    }
                }
                Signal::CtrlD | Signal::CtrlC => {
                    println!("\n[*] Interrupted");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Run the CLI REPL, optionally attaching or launching first
pub fn run_cli(config: &Config, pid: Option<u32>, command_line: Vec<String>) -> Result<()> {
    let mut repl = Repl::new(config);
    if let Some(pid) = pid {
        repl.attach(pid);
    } else if !command_line.is_empty() {
        repl.launch(command_line);
    }
    repl.run()
}
