// CLASSIFICATION: COMMUNITY
// Filename: action.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-04-02

//! One-shot actions and the queues that drain them.
//!
//! An action is a named list of commands bound to a trigger: a boot event
//! (`early-init`, `init`, `late-init`, ...), a property predicate, or a
//! builtin marker for functions queued directly by the stage controller.
//! Queued actions are executed exactly once, one command per scheduler step,
//! so the supervisor loop stays responsive between commands.

use std::collections::VecDeque;

use crate::world::World;

/// Builtin actions are plain functions returning an exit-style status.
pub type BuiltinFn = fn(&mut World) -> i32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Named boot event.
    Event(String),
    /// Fires when `name` is set to `value`; `"*"` matches any value.
    Property { name: String, value: String },
    /// Queued directly, no trigger matching.
    Builtin,
}

#[derive(Clone)]
pub enum Command {
    /// A script command: keyword plus arguments, dispatched via the command
    /// vocabulary in `rcscript`.
    Exec(Vec<String>),
    /// An in-process builtin.
    Builtin(BuiltinFn),
}

#[derive(Clone)]
pub struct Action {
    pub name: String,
    pub trigger: Trigger,
    pub commands: Vec<Command>,
}

/// FIFO scheduler over registered actions.
///
/// The registry keeps every known action; the queue holds indices of actions
/// waiting to run. Property triggers only fire once [`enable_property_triggers`]
/// has been called, so early mutations are held until the boot script has
/// fully loaded.
///
/// [`enable_property_triggers`]: ActionManager::enable_property_triggers
#[derive(Default)]
pub struct ActionManager {
    registry: Vec<Action>,
    queue: VecDeque<usize>,
    current_command: usize,
    triggers_enabled: bool,
}

impl ActionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parsed action. Returns its registry slot.
    pub fn add_action(&mut self, action: Action) -> usize {
        self.registry.push(action);
        self.registry.len() - 1
    }

    /// Queue every action triggered by `event`, in registration order.
    pub fn queue_event_trigger(&mut self, event: &str) {
        log::debug!("queueing event trigger '{}'", event);
        for (idx, action) in self.registry.iter().enumerate() {
            if action.trigger == Trigger::Event(event.to_string()) {
                self.queue.push_back(idx);
            }
        }
    }

    /// Queue a one-off builtin under `name`.
    pub fn queue_builtin_action(&mut self, func: BuiltinFn, name: &str) {
        let idx = self.add_action(Action {
            name: name.to_string(),
            trigger: Trigger::Builtin,
            commands: vec![Command::Builtin(func)],
        });
        self.queue.push_back(idx);
    }

    /// Queue actions whose property predicate matches this observation.
    /// Held until the latch is set.
    pub fn queue_property_trigger(&mut self, name: &str, value: &str) {
        if !self.triggers_enabled {
            return;
        }
        for (idx, action) in self.registry.iter().enumerate() {
            if let Trigger::Property {
                name: tn,
                value: tv,
            } = &action.trigger
            {
                if tn == name && (tv == value || tv == "*") {
                    self.queue.push_back(idx);
                }
            }
        }
    }

    /// Replay property triggers against the current store contents. Called
    /// once, right after the latch is set.
    pub fn queue_all_property_triggers(&mut self, snapshot: &[(String, String)]) {
        for (name, value) in snapshot {
            self.queue_property_trigger(name, value);
        }
    }

    /// Set the trigger-enable latch.
    pub fn enable_property_triggers(&mut self) {
        self.triggers_enabled = true;
    }

    pub fn property_triggers_enabled(&self) -> bool {
        self.triggers_enabled
    }

    pub fn has_more_commands(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Pop the next command of the head action, advancing past finished and
    /// empty actions. Returns the owning action's name with the command.
    pub fn next_command(&mut self) -> Option<(String, Command)> {
        loop {
            let idx = *self.queue.front()?;
            let action = &self.registry[idx];
            if self.current_command >= action.commands.len() {
                self.queue.pop_front();
                self.current_command = 0;
                continue;
            }
            let cmd = action.commands[self.current_command].clone();
            let name = action.name.clone();
            self.current_command += 1;
            if self.current_command >= action.commands.len() {
                self.queue.pop_front();
                self.current_command = 0;
            }
            return Some((name, cmd));
        }
    }
}
