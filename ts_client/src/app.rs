//! Line-oriented session front end.
//!
//! Prints what changed in the effective view, notices and prompts as they
//! arrive, and turns typed lines into session requests.

use crate::{
    commands::{HELP, Intent, parse_command},
    logging,
};
use anyhow::Result;
use chrono::Local;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use turn_sync::{
    EffectiveView, ParticipantId, Phase, SessionError, SessionHandle, SessionUpdate,
    sync::Connectivity,
};

pub struct App {
    session: SessionHandle,
    updates: mpsc::UnboundedReceiver<SessionUpdate>,
    local: ParticipantId,
    game_id: String,
}

impl App {
    pub fn new(
        session: SessionHandle,
        updates: mpsc::UnboundedReceiver<SessionUpdate>,
        local: ParticipantId,
        game_id: String,
    ) -> Self {
        Self {
            session,
            updates,
            local,
            game_id,
        }
    }

    /// Run until the session stops.
    pub async fn run(mut self) -> Result<()> {
        let mut view = self.session.subscribe();
        let mut shown = view.borrow_and_update().clone();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut quitting = false;

        println!("Joined game {} as {}. Type 'help' for commands.", self.game_id, self.local);

        loop {
            tokio::select! {
                update = self.updates.recv() => match update {
                    Some(update) => print_update(&update),
                    None => break,
                },

                changed = view.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = view.borrow_and_update().clone();
                    if current.connectivity != shown.connectivity {
                        logging::log_connectivity(current.connectivity, &self.game_id);
                    }
                    for line in describe_changes(&shown, &current) {
                        println!("[{}] {line}", Local::now().format("%H:%M:%S"));
                    }
                    shown = current;
                }

                line = lines.next_line(), if !quitting => match line? {
                    Some(line) => {
                        if !self.handle_line(&line).await {
                            quitting = true;
                        }
                    }
                    None => {
                        self.session.leave().await?;
                        quitting = true;
                    }
                },
            }
        }

        println!("Session closed");
        Ok(())
    }

    /// Returns false once the player asked to quit.
    async fn handle_line(&self, line: &str) -> bool {
        if line.trim().is_empty() {
            return true;
        }

        let result = match parse_command(line) {
            Ok(Intent::Command(command)) => self.session.submit(command).await,
            Ok(Intent::Arm(kind)) => {
                let armed = kind.to_string();
                self.session
                    .arm(kind)
                    .await
                    .map(|()| println!("Armed {armed}"))
            }
            Ok(Intent::Disarm) => self.session.disarm().await,
            Ok(Intent::Ack(participant)) => {
                let participant = participant.unwrap_or_else(|| self.local.clone());
                self.session.render_ack(participant).await
            }
            Ok(Intent::Help) => {
                print!("{HELP}");
                Ok(())
            }
            Ok(Intent::Quit) => {
                println!("Leaving...");
                if let Err(e) = self.session.leave().await {
                    tracing::warn!(error = %e, "Leave failed");
                }
                return false;
            }
            Err(e) => {
                eprintln!("{e}");
                return true;
            }
        };

        match result {
            Ok(()) => true,
            Err(SessionError::Closed) => false,
            Err(e) => {
                eprintln!("Error: {e}");
                true
            }
        }
    }
}

fn print_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::Notice(notice) => println!("* {notice}"),
        SessionUpdate::Prompt(prompt) => println!(">> {prompt}"),
        SessionUpdate::PromptsCleared => {}
    }
}

fn name_of(view: &EffectiveView, id: &ParticipantId) -> String {
    view.participant(id)
        .map(|p| p.state.name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| id.to_string())
}

/// Human-readable lines for what differs between two views.
pub fn describe_changes(before: &EffectiveView, after: &EffectiveView) -> Vec<String> {
    let mut lines = Vec::new();

    if before.connectivity != after.connectivity {
        lines.push(match after.connectivity {
            Connectivity::Connecting => "connecting...".to_string(),
            Connectivity::Online => "online".to_string(),
            Connectivity::Reconnecting { attempts } => {
                format!("connection lost, reconnecting (attempt {attempts})")
            }
            Connectivity::Offline => "offline".to_string(),
        });
    }

    if after.log.len() > before.log.len() {
        lines.extend(after.log[before.log.len()..].iter().cloned());
    }

    if after.chat.len() > before.chat.len() {
        for line in &after.chat[before.chat.len()..] {
            lines.push(format!("<{}> {}", line.name, line.message));
        }
    }

    for (id, participant) in &after.participants {
        let Some(previous) = before.participant(id) else {
            continue;
        };
        if participant.walk.is_none() && previous.state.position != participant.state.position {
            lines.push(format!(
                "{} is on cell {}",
                name_of(after, id),
                participant.state.position
            ));
        }
        if previous.state.money != participant.state.money {
            lines.push(format!("{} has ${}", name_of(after, id), participant.state.money));
        }
    }

    for (id, phase) in &after.phases {
        if before.phase_of(id) != *phase && *phase == Phase::Rolling {
            lines.push(format!("{} rolled {}+{}", name_of(after, id), after.dice[0], after.dice[1]));
        }
    }

    if before.current_participant() != after.current_participant() {
        if let Some(current) = after.current_participant() {
            lines.push(format!("turn {}: {}", after.turn_number, name_of(after, current)));
        }
    }

    if before.winner != after.winner {
        if let Some(winner) = &after.winner {
            lines.push(format!("{} wins", name_of(after, winner)));
        }
    }

    lines
}
