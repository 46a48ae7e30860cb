//! Control panel: answers operator commands sent to the control chat.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channels::transport::{Conversation, Transport};
use crate::config::OperatorConfig;
use crate::control::session::{Command, OperatorSession, SessionState};
use crate::error::Error;
use crate::pipeline::Router;
use crate::pipeline::rules::STATUS_ACTIVE;
use crate::pipeline::types::{ChatKind, DocumentInfo, IncomingEvent, OutgoingMessage};
use crate::store::RuleStore;
use crate::store::rules_io::{self, BLEEPS_FILE_NAME, RULES_FILE_NAME};

/// Status written by `cmd:disable`.
pub const STATUS_DISABLED: &str = "disabled";

const DIALOGS_PER_MESSAGE: usize = 10;
const RULES_PER_MESSAGE: usize = 5;

const READY_TEXT: &str =
    "*I'm ready to work.*\nSend me a 'help' command for information about control commands.";
const NO_RULES_TEXT: &str =
    "Rules not found. Fill the CSV file and upload it to my bot!\n\nI'm ready to work.";
const UNWANTED_CSV_TEXT: &str = "Unwanted operation detected. If you want to send me a CSV file \
     with new rules, then you must use the command: cmd:import rules";

/// Handles everything that arrives in the control chat.
pub struct ControlPanel {
    transport: Arc<dyn Transport>,
    store: Arc<dyn RuleStore>,
    router: Arc<Router>,
    config: OperatorConfig,
    session: Mutex<OperatorSession>,
}

impl ControlPanel {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn RuleStore>,
        router: Arc<Router>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            transport,
            store,
            router,
            config,
            session: Mutex::new(OperatorSession::new()),
        }
    }

    pub fn control_chat_id(&self) -> i64 {
        self.config.control_chat_id
    }

    pub async fn session_state(&self) -> SessionState {
        self.session.lock().await.state()
    }

    /// Handle one control-chat event. Returns whether it was recognised.
    /// Failures are reported back to the operator and never propagate.
    pub async fn handle(&self, event: &IncomingEvent) -> bool {
        match self.dispatch(event).await {
            Ok(handled) => handled,
            Err(e) => {
                warn!(chat_id = event.chat_id, error = %e, "Control command failed");
                self.reply(format!("Error!\n{e}")).await;
                true
            }
        }
    }

    async fn dispatch(&self, event: &IncomingEvent) -> Result<bool, Error> {
        if let Some(command) = Command::parse(&event.text) {
            info!(?command, "Operator command");
            self.run(command).await?;
            return Ok(true);
        }

        if let Some(doc) = event.document.as_ref().filter(|d| d.is_csv()) {
            if self.session.lock().await.is_awaiting_csv() {
                self.import(doc).await?;
            } else {
                self.reply(UNWANTED_CSV_TEXT.to_string()).await;
            }
            return Ok(true);
        }

        debug!(text = %event.text, "Ignoring unrecognised control message");
        Ok(false)
    }

    async fn run(&self, command: Command) -> Result<(), Error> {
        match command {
            Command::Help => {
                self.reply(help_text(&self.config.owner_name)).await;
            }
            Command::MyDialogs => self.list_dialogs().await?,
            Command::ExportRules => self.export().await?,
            Command::ImportRules => {
                self.set_state(SessionState::AwaitingRulesCsv).await;
                self.reply(format!(
                    "*Hello {}!*\nUpload CSV file with new rules here and I'll import it into the database.",
                    self.config.owner_name
                ))
                .await;
            }
            Command::RestartReload => self.reload_and_report().await?,
            Command::Enable(uid) => self.set_rule_status(uid, STATUS_ACTIVE).await?,
            Command::Disable(uid) => self.set_rule_status(uid, STATUS_DISABLED).await?,
        }
        Ok(())
    }

    // ── Commands ────────────────────────────────────────────────────

    async fn list_dialogs(&self) -> Result<(), Error> {
        let conversations = self.transport.list_conversations().await?;
        if conversations.is_empty() {
            self.reply("No conversations seen yet.".to_string()).await;
            return Ok(());
        }

        for kind in [ChatKind::Channel, ChatKind::Group, ChatKind::Private] {
            let lines = dialog_lines(&conversations, kind);
            for chunk in lines.chunks(DIALOGS_PER_MESSAGE) {
                self.reply(chunk.concat()).await;
            }
        }
        Ok(())
    }

    async fn export(&self) -> Result<(), Error> {
        let rules = self.store.load_rules().await?;
        let bleeps = self.store.load_bleep_rules().await?;

        let rules_csv = rules_io::export_rules(&rules, self.config.owner_id)?;
        let bleeps_csv = rules_io::export_bleep_rules(&bleeps)?;

        let chat_id = self.config.control_chat_id;
        self.transport
            .send_document(chat_id, rules_csv, RULES_FILE_NAME, None)
            .await?;
        self.transport
            .send_document(chat_id, bleeps_csv, BLEEPS_FILE_NAME, None)
            .await?;

        info!(rules = rules.len(), bleeps = bleeps.len(), "Rules exported");
        Ok(())
    }

    async fn import(&self, doc: &DocumentInfo) -> Result<(), Error> {
        // Whatever happens to this file, the next CSV needs a fresh command.
        self.set_state(SessionState::Idle).await;

        let bytes = self.transport.download_document(&doc.file_id).await?;
        let summary = rules_io::import_csv(self.store.as_ref(), &bytes).await?;
        info!(
            kind = %summary.kind,
            imported = summary.imported,
            skipped = summary.skipped.len(),
            "CSV imported"
        );
        self.reply(summary.to_string()).await;
        self.reload_and_report().await
    }

    /// Reload the router and list the stored rules for the operator.
    pub async fn reload_and_report(&self) -> Result<(), Error> {
        self.router.reload(self.store.as_ref()).await?;
        let rules = self.store.load_rules().await?;

        if rules.is_empty() {
            self.reply(NO_RULES_TEXT.to_string()).await;
            return Ok(());
        }

        self.reply(format!("*{} rules data loaded:*", rules.len()))
            .await;
        let lines: Vec<String> = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| format!("*{}*. {}\n\n", i + 1, rule.summary()))
            .collect();
        for chunk in lines.chunks(RULES_PER_MESSAGE) {
            self.reply(chunk.concat()).await;
        }
        self.reply(READY_TEXT.to_string()).await;
        Ok(())
    }

    async fn set_rule_status(&self, uid: i64, status: &str) -> Result<(), Error> {
        self.store.update_rule_status(uid, status).await?;
        self.router.reload(self.store.as_ref()).await?;
        info!(uid, status, "Rule status changed");
        self.reply(format!("Rule #{uid} is now {status}.")).await;
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn set_state(&self, target: SessionState) {
        if let Err(e) = self.session.lock().await.transition(target) {
            warn!(error = %e, "Invalid operator session transition");
        }
    }

    /// Send text to the control chat. Failures are logged only.
    async fn reply(&self, text: String) {
        let chat_id = self.config.control_chat_id;
        if let Err(e) = self
            .transport
            .send_message(chat_id, OutgoingMessage::Text(text))
            .await
        {
            warn!(chat_id, error = %e, "Failed to reply to operator");
        }
    }
}

fn help_text(owner_name: &str) -> String {
    format!(
        "*Hello {owner_name}!*\n\
         You can use the following commands to control:\n\n\
         cmd:my dialogs - show all the dialogs/conversations that you are part of;\n\n\
         cmd:export rules - export rules definition into CSV file;\n\n\
         cmd:import rules - import rules CSV file into database;\n\n\
         cmd:restart reload - reload rules from database;\n\n\
         cmd:enable <uid> / cmd:disable <uid> - switch a rule on or off;\n\n"
    )
}

/// One numbered line per conversation of `kind`.
fn dialog_lines(conversations: &[Conversation], kind: ChatKind) -> Vec<String> {
    conversations
        .iter()
        .filter(|c| c.kind == kind)
        .enumerate()
        .map(|(i, c)| format!("*{}*. {}: {}\t id: *{}*\n", i + 1, kind, c.title, c.id))
        .collect()
}
