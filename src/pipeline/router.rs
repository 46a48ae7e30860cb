//! Rule router.
//!
//! Every message runs through:
//! 1. recipient exclusion (no forward loops)
//! 2. bleep censoring in the source chat
//! 3. each active rule whose donor is the source chat:
//!    sender → black list → or list → and list → filter expression
//! 4. render and dispatch for every rule that passes
//! 5. trash-bin fallback when no rule claimed the message
//!
//! Rules are read from an immutable [`RouterSnapshot`] that reload swaps out
//! wholesale, so a message is never evaluated against a half-built rule set.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::channels::transport::Transport;
use crate::config::RouterConfig;
use crate::error::{DatabaseError, TransportError};
use crate::filters::{FilterExpression, check_and_list, check_black_list, check_or_list};
use crate::pipeline::bleep::{self, BleepFilter};
use crate::pipeline::format;
use crate::pipeline::rules::{BleepRule, Rule};
use crate::pipeline::types::{
    Disposition, EventState, IncomingEvent, OutgoingMessage, RouteReport, RuleOutcome,
};
use crate::store::RuleStore;

// ── Snapshot ────────────────────────────────────────────────────────

/// A rule with its filter expression compiled once per snapshot.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    filter: Result<FilterExpression, String>,
}

impl CompiledRule {
    pub fn new(rule: Rule) -> Self {
        let filter = FilterExpression::parse(&rule.filter).map_err(|e| e.to_string());
        if let Err(reason) = &filter {
            warn!(rule = rule.uid, reason = %reason, "Rule has a malformed filter and will never match");
        }
        Self { rule, filter }
    }

    /// Run the predicate stages. `Err` carries the first failing stage's
    /// reason.
    pub fn evaluate(&self, event: &IncomingEvent, text: &str) -> Result<(), String> {
        let rule = &self.rule;

        let verdict = rule.sender_constraint().check(event.sender.as_ref());
        if !verdict.is_match() {
            let observed = event.sender.clone().unwrap_or_default();
            return Err(format!("sender mismatch: {observed}"));
        }

        if !check_black_list(text, &rule.black_list) {
            return Err(format!("black list: {}", rule.black_list));
        }
        if !check_or_list(text, &rule.or_list) {
            return Err(format!("or list: {}", rule.or_list));
        }
        if !check_and_list(text, &rule.and_list) {
            return Err(format!("and list: {}", rule.and_list));
        }

        match &self.filter {
            Ok(expression) if expression.matches(text) => Ok(()),
            Ok(_) => Err(format!("filter: {}", rule.filter)),
            Err(reason) => Err(format!("malformed filter: {reason}")),
        }
    }
}

/// Where unclaimed messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashBin {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
}

impl TrashBin {
    fn from_rule(rule: &Rule) -> Self {
        Self {
            id: rule.recip_id,
            name: rule.recip_name.clone(),
            enabled: rule.is_active() && rule.recip_id != 0,
        }
    }
}

/// Immutable routing state built from the stored rules.
#[derive(Debug, Clone, Default)]
pub struct RouterSnapshot {
    rules: Vec<CompiledRule>,
    recipient_ids: HashSet<i64>,
    bleeps: Vec<BleepFilter>,
    trash_bin: Option<TrashBin>,
}

impl RouterSnapshot {
    /// Build from all stored rules, keeping stored order. Inactive rules are
    /// dropped; the trash-bin row only configures the fallback.
    pub fn build(rules: Vec<Rule>, bleep_rules: Vec<BleepRule>) -> Self {
        let trash_bin = rules
            .iter()
            .find(|r| r.is_trash_bin())
            .map(TrashBin::from_rule);

        let rules: Vec<CompiledRule> = rules
            .into_iter()
            .filter(|r| r.is_active() && !r.is_trash_bin())
            .map(CompiledRule::new)
            .collect();

        let mut recipient_ids: HashSet<i64> = rules.iter().map(|c| c.rule.recip_id).collect();
        if let Some(trash) = trash_bin.as_ref().filter(|t| t.id != 0) {
            recipient_ids.insert(trash.id);
        }

        let bleeps = bleep_rules
            .into_iter()
            .filter(BleepRule::is_active)
            .map(BleepFilter::new)
            .collect();

        Self {
            rules,
            recipient_ids,
            bleeps,
            trash_bin,
        }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn bleeps(&self) -> &[BleepFilter] {
        &self.bleeps
    }

    pub fn trash_bin(&self) -> Option<&TrashBin> {
        self.trash_bin.as_ref()
    }

    pub fn is_recipient(&self, chat_id: i64) -> bool {
        self.recipient_ids.contains(&chat_id)
    }

    pub fn is_bleep_donor(&self, chat_id: i64) -> bool {
        self.bleeps.iter().any(|b| b.donor_id() == chat_id)
    }

    /// Active rules fed by this chat, in stored order.
    pub fn rules_for_donor(&self, chat_id: i64) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter().filter(move |c| c.rule.donor_id == chat_id)
    }
}

// ── Router ──────────────────────────────────────────────────────────

/// Routes inbound messages according to the current snapshot.
pub struct Router {
    snapshot: RwLock<Arc<RouterSnapshot>>,
    transport: Arc<dyn Transport>,
    config: RouterConfig,
}

impl Router {
    /// A router with an empty rule set.
    pub fn new(transport: Arc<dyn Transport>, config: RouterConfig) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(RouterSnapshot::default())),
            transport,
            config,
        }
    }

    /// The snapshot currently in use.
    pub async fn snapshot(&self) -> Arc<RouterSnapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Swap in a new snapshot.
    pub async fn install(&self, snapshot: RouterSnapshot) -> Arc<RouterSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().await = Arc::clone(&snapshot);
        snapshot
    }

    /// Rebuild the snapshot from the store and swap it in. On error the
    /// current snapshot stays.
    pub async fn reload(&self, store: &dyn RuleStore) -> Result<Arc<RouterSnapshot>, DatabaseError> {
        let rules = store.load_rules().await?;
        let bleep_rules = store.load_bleep_rules().await?;
        let snapshot = self.install(RouterSnapshot::build(rules, bleep_rules)).await;

        info!(
            rules = snapshot.rules().len(),
            bleeps = snapshot.bleeps().len(),
            trash_bin = snapshot.trash_bin().is_some_and(|t| t.enabled),
            "Router snapshot reloaded"
        );
        Ok(snapshot)
    }

    /// Process one message to completion.
    pub async fn handle(&self, event: &IncomingEvent) -> RouteReport {
        let snapshot = self.snapshot().await;

        // Recipients are only admitted for censoring
        let from_recipient = snapshot.is_recipient(event.chat_id);
        if from_recipient && !snapshot.is_bleep_donor(event.chat_id) {
            debug!(chat_id = event.chat_id, "Message from a recipient chat, skipped");
            return RouteReport::skipped(event);
        }

        let censored_text =
            bleep::apply(self.transport.as_ref(), snapshot.bleeps(), event).await;
        let text = censored_text.as_deref().unwrap_or(&event.text);

        let mut state = EventState::new();
        let mut outcomes = Vec::new();

        for compiled in snapshot.rules_for_donor(event.chat_id) {
            let rule = &compiled.rule;
            let outcome = match compiled.evaluate(event, text) {
                Err(reason) => {
                    debug!(chat_id = event.chat_id, rule = rule.uid, reason = %reason, "Rule rejected message");
                    state.reject(reason.clone());
                    RuleOutcome::Rejected(reason)
                }
                Ok(()) => {
                    let message = format::render(rule, event, text, self.config);
                    match self.transport.send_message(rule.recip_id, message).await {
                        Ok(()) => {
                            info!(
                                chat_id = event.chat_id,
                                rule = rule.uid,
                                recipient = rule.recip_id,
                                "Message forwarded"
                            );
                            state.claim();
                            RuleOutcome::Claimed
                        }
                        Err(e) => {
                            self.report_failure(rule, &e).await;
                            let detail = e.to_string();
                            state.reject(detail.clone());
                            RuleOutcome::Failed(detail)
                        }
                    }
                }
            };
            outcomes.push((rule.uid, outcome));
        }

        let disposition = if state.is_claimed() {
            Disposition::Claimed
        } else if from_recipient {
            debug!(chat_id = event.chat_id, "Unclaimed message from a recipient chat, kept");
            Disposition::Kept
        } else {
            self.send_to_trash(&snapshot, event, text, state.reason())
                .await
        };

        RouteReport {
            chat_id: event.chat_id,
            message_id: event.message_id,
            disposition,
            outcomes,
            reason: state.reason().to_string(),
            censored_text,
        }
    }

    async fn send_to_trash(
        &self,
        snapshot: &RouterSnapshot,
        event: &IncomingEvent,
        text: &str,
        reason: &str,
    ) -> Disposition {
        let Some(trash) = snapshot.trash_bin().filter(|t| t.enabled) else {
            warn!(
                chat_id = event.chat_id,
                message_id = event.message_id,
                reason,
                "Unclaimed message dropped, trash bin not configured"
            );
            return Disposition::Dropped;
        };

        let message = format::render_trash(reason, event, text, self.config);
        match self.transport.send_message(trash.id, message).await {
            Ok(()) => {
                debug!(chat_id = event.chat_id, reason, "Message sent to trash bin");
                Disposition::Trashed
            }
            Err(e) => {
                error!(chat_id = event.chat_id, error = %e, "Trash bin dispatch failed");
                self.notify_operator(format!("Error!\n{e}\n{}\nR: {}", trash.name, trash.id))
                    .await;
                Disposition::Dropped
            }
        }
    }

    /// Tell the operator a rule could not dispatch.
    async fn report_failure(&self, rule: &Rule, error: &TransportError) {
        error!(rule = rule.uid, recipient = rule.recip_id, error = %error, "Dispatch failed");
        self.notify_operator(format!(
            "Error!\n{error}\n{}\nR: {}\nD: {}",
            rule.label(),
            rule.recip_id,
            rule.donor_id
        ))
        .await;
    }

    async fn notify_operator(&self, text: String) {
        if self.config.control_chat_id == 0 {
            return;
        }
        if let Err(e) = self
            .transport
            .send_message(self.config.control_chat_id, OutgoingMessage::Text(text))
            .await
        {
            error!(error = %e, "Could not report to the control chat");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::memory::{Delivery, MemoryTransport};
    use crate::filters::SenderInfo;
    use crate::pipeline::rules::TRASH_BIN_TITLE;
    use crate::pipeline::types::ChatKind;

    const DONOR: i64 = -1001;
    const RECIPIENT: i64 = -2002;
    const TRASH: i64 = -3003;
    const CONTROL: i64 = -4004;

    fn rule(uid: i64, filter: &str) -> Rule {
        Rule {
            uid,
            recip_name: "Out".into(),
            recip_id: RECIPIENT,
            donor_name: "In".into(),
            donor_id: DONOR,
            filter: filter.into(),
            format: "m".into(),
            status: "active".into(),
            ..Default::default()
        }
    }

    fn trash_rule(status: &str) -> Rule {
        Rule {
            uid: 100,
            recip_name: "Trash".into(),
            recip_id: TRASH,
            title: TRASH_BIN_TITLE.into(),
            status: status.into(),
            ..Default::default()
        }
    }

    fn post(text: &str) -> IncomingEvent {
        IncomingEvent::text(DONOR, 1, ChatKind::Channel, text)
    }

    async fn router_with(rules: Vec<Rule>, bleeps: Vec<BleepRule>) -> (Router, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let router = Router::new(
            transport.clone(),
            RouterConfig {
                control_chat_id: CONTROL,
                enable_forbidden_content: false,
            },
        );
        router.install(RouterSnapshot::build(rules, bleeps)).await;
        (router, transport)
    }

    #[test]
    fn snapshot_excludes_inactive_and_trash_rules() {
        let mut inactive = rule(2, "*");
        inactive.status = "off".into();
        let snapshot = RouterSnapshot::build(
            vec![rule(1, "*"), inactive, trash_rule("active")],
            Vec::new(),
        );
        assert_eq!(snapshot.rules().len(), 1);
        assert!(snapshot.is_recipient(RECIPIENT));
        assert!(snapshot.is_recipient(TRASH));
        assert_eq!(
            snapshot.trash_bin(),
            Some(&TrashBin {
                id: TRASH,
                name: "Trash".into(),
                enabled: true
            })
        );
    }

    #[test]
    fn trash_bin_without_id_is_disabled() {
        let mut trash = trash_rule("active");
        trash.recip_id = 0;
        let snapshot = RouterSnapshot::build(vec![trash], Vec::new());
        assert!(!snapshot.trash_bin().unwrap().enabled);
    }

    #[test]
    fn evaluation_reports_first_failing_stage() {
        let mut r = rule(1, "news");
        r.black_list = "spam".into();
        r.or_list = "today|tomorrow".into();
        let compiled = CompiledRule::new(r);

        let event = post("");
        assert_eq!(
            compiled.evaluate(&event, "spam news today"),
            Err("black list: spam".into())
        );
        assert_eq!(
            compiled.evaluate(&event, "news yesterday"),
            Err("or list: today|tomorrow".into())
        );
        assert_eq!(
            compiled.evaluate(&event, "weather today"),
            Err("filter: news".into())
        );
        assert_eq!(compiled.evaluate(&event, "news today"), Ok(()));
    }

    #[test]
    fn sender_rejection_names_observed_sender() {
        let mut r = rule(1, "*");
        r.sender_uname = "bob".into();
        let compiled = CompiledRule::new(r);
        let event = IncomingEvent::text(DONOR, 1, ChatKind::Group, "hi").with_sender(SenderInfo {
            id: 5,
            username: "alice".into(),
            ..Default::default()
        });
        let reason = compiled.evaluate(&event, "hi").unwrap_err();
        assert!(reason.starts_with("sender mismatch"));
        assert!(reason.contains("alice"));
    }

    #[tokio::test]
    async fn matching_rule_claims_and_forwards() {
        let (router, transport) = router_with(vec![rule(1, "*"), trash_rule("active")], vec![]).await;
        let report = router.handle(&post("hello")).await;

        assert_eq!(report.disposition, Disposition::Claimed);
        assert_eq!(report.outcomes, vec![(1, RuleOutcome::Claimed)]);
        assert_eq!(
            transport.sent_to(RECIPIENT).await,
            vec![OutgoingMessage::Text("hello".into())]
        );
        assert!(transport.sent_to(TRASH).await.is_empty());
    }

    #[tokio::test]
    async fn several_rules_may_claim_one_message() {
        let mut second = rule(2, "hello");
        second.recip_id = -5005;
        let (router, transport) = router_with(vec![rule(1, "*"), second], vec![]).await;
        let report = router.handle(&post("hello")).await;

        assert_eq!(report.claimed_count(), 2);
        assert_eq!(transport.sent_to(RECIPIENT).await.len(), 1);
        assert_eq!(transport.sent_to(-5005).await.len(), 1);
    }

    #[tokio::test]
    async fn unclaimed_message_goes_to_trash_once() {
        let (router, transport) =
            router_with(vec![rule(1, "sports"), rule(2, "weather"), trash_rule("active")], vec![])
                .await;
        let report = router.handle(&post("politics")).await;

        assert_eq!(report.disposition, Disposition::Trashed);
        assert_eq!(report.reason, "filter: weather");
        let trashed = transport.sent_to(TRASH).await;
        assert_eq!(trashed.len(), 1);
        assert!(trashed[0].text().starts_with("*filter: weather*\n"));
    }

    #[tokio::test]
    async fn unmatched_source_goes_to_trash_unfiltered() {
        let (router, transport) = router_with(vec![rule(1, "*"), trash_rule("active")], vec![]).await;
        let event = IncomingEvent::text(-9999, 1, ChatKind::Channel, "elsewhere");
        let report = router.handle(&event).await;

        assert_eq!(report.disposition, Disposition::Trashed);
        assert_eq!(report.reason, "unfiltered");
        assert_eq!(transport.sent_to(TRASH).await.len(), 1);
    }

    #[tokio::test]
    async fn disabled_trash_bin_drops() {
        let (router, transport) =
            router_with(vec![rule(1, "sports"), trash_rule("")], vec![]).await;
        let report = router.handle(&post("politics")).await;

        assert_eq!(report.disposition, Disposition::Dropped);
        assert!(transport.deliveries().await.is_empty());
    }

    #[tokio::test]
    async fn recipient_chats_are_skipped() {
        let (router, transport) = router_with(vec![rule(1, "*"), trash_rule("active")], vec![]).await;
        let event = IncomingEvent::text(RECIPIENT, 1, ChatKind::Channel, "loop?");
        let report = router.handle(&event).await;

        assert_eq!(report.disposition, Disposition::Skipped);
        assert!(transport.deliveries().await.is_empty());
    }

    #[tokio::test]
    async fn recipient_that_is_bleep_donor_is_censored() {
        let bleep = BleepRule {
            donor_id: RECIPIENT,
            black_list: "heck".into(),
            status: "active".into(),
            ..Default::default()
        };
        let (router, transport) = router_with(vec![rule(1, "*")], vec![bleep]).await;
        transport.allow_edits(RECIPIENT).await;

        let event = IncomingEvent::text(RECIPIENT, 9, ChatKind::Channel, "oh heck");
        let report = router.handle(&event).await;

        assert_ne!(report.disposition, Disposition::Skipped);
        assert_eq!(report.censored_text.as_deref(), Some("oh ****"));
        assert!(transport.deliveries().await.contains(&Delivery::Edited {
            chat_id: RECIPIENT,
            message_id: 9,
            text: "oh ****".into()
        }));
    }

    #[tokio::test]
    async fn censored_trash_bin_does_not_feed_itself() {
        let bleep = BleepRule {
            donor_id: TRASH,
            black_list: "heck".into(),
            status: "active".into(),
            ..Default::default()
        };
        let (router, transport) =
            router_with(vec![rule(1, "*"), trash_rule("active")], vec![bleep]).await;

        let event = IncomingEvent::text(TRASH, 1, ChatKind::Channel, "hello there");
        let report = router.handle(&event).await;

        assert_eq!(report.disposition, Disposition::Kept);
        assert!(transport.sent_to(TRASH).await.is_empty());
    }

    #[tokio::test]
    async fn censored_recipient_is_not_trashed() {
        let bleep = BleepRule {
            donor_id: RECIPIENT,
            black_list: "heck".into(),
            status: "active".into(),
            ..Default::default()
        };
        let (router, transport) =
            router_with(vec![rule(1, "*"), trash_rule("active")], vec![bleep]).await;

        let event = IncomingEvent::text(RECIPIENT, 4, ChatKind::Channel, "oh heck");
        let report = router.handle(&event).await;

        assert_eq!(report.disposition, Disposition::Kept);
        assert_eq!(report.censored_text.as_deref(), Some("oh ****"));
        assert!(transport.sent_to(TRASH).await.is_empty());
    }

    #[tokio::test]
    async fn censored_text_is_forwarded() {
        let bleep = BleepRule {
            donor_id: DONOR,
            black_list: "heck".into(),
            status: "active".into(),
            ..Default::default()
        };
        let (router, transport) = router_with(vec![rule(1, "*")], vec![bleep]).await;
        router.handle(&post("what the heck")).await;

        assert_eq!(
            transport.sent_to(RECIPIENT).await,
            vec![OutgoingMessage::Text("what the ****".into())]
        );
    }

    #[tokio::test]
    async fn dispatch_failure_is_reported_and_isolated() {
        let mut broken = rule(1, "*");
        broken.recip_id = -6006;
        broken.title = "Broken".into();
        let (router, transport) =
            router_with(vec![broken, rule(2, "*"), trash_rule("active")], vec![]).await;
        transport.fail_sends_to(-6006).await;

        let report = router.handle(&post("hello")).await;

        assert!(matches!(report.outcomes[0].1, RuleOutcome::Failed(_)));
        assert_eq!(report.outcomes[1].1, RuleOutcome::Claimed);
        assert_eq!(report.disposition, Disposition::Claimed);

        let reports = transport.sent_to(CONTROL).await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].text().starts_with("Error!\n"));
        assert!(reports[0].text().contains("Broken\nR: -6006\nD: -1001"));
    }

    #[tokio::test]
    async fn failed_only_rule_falls_back_to_trash() {
        let (router, transport) = router_with(vec![rule(1, "*"), trash_rule("active")], vec![]).await;
        transport.fail_sends_to(RECIPIENT).await;

        let report = router.handle(&post("hello")).await;
        assert_eq!(report.disposition, Disposition::Trashed);
        assert_eq!(transport.sent_to(TRASH).await.len(), 1);
    }

    #[tokio::test]
    async fn protected_content_is_replaced_but_claimed() {
        let (router, transport) = router_with(vec![rule(1, "*"), trash_rule("active")], vec![]).await;
        let event = post("secret").with_protected_content(true);
        let report = router.handle(&event).await;

        assert_eq!(report.disposition, Disposition::Claimed);
        let sent = transport.sent_to(RECIPIENT).await;
        assert!(sent[0].text().contains("is forbidden"));
        assert!(!sent[0].text().contains("secret"));
    }

    #[tokio::test]
    async fn routing_is_idempotent() {
        let (router, transport) =
            router_with(vec![rule(1, "news"), rule(2, "*patt*"), trash_rule("active")], vec![])
                .await;
        let event = post("news about patterns");

        let first = router.handle(&event).await;
        let first_sent = transport.deliveries().await;
        transport.clear().await;
        let second = router.handle(&event).await;

        assert_eq!(first, second);
        assert_eq!(first_sent, transport.deliveries().await);
    }

    #[tokio::test]
    async fn reload_swaps_snapshot() {
        use crate::store::LibSqlBackend;

        let store = LibSqlBackend::new_memory().await.unwrap();
        store
            .replace_rules(&[rule(0, "*"), trash_rule("active")])
            .await
            .unwrap();

        let (router, _) = router_with(Vec::new(), Vec::new()).await;
        let before = router.snapshot().await;
        assert!(before.rules().is_empty());

        router.reload(&store).await.unwrap();
        let after = router.snapshot().await;
        assert_eq!(after.rules().len(), 1);
        assert!(before.rules().is_empty());
    }

    #[tokio::test]
    async fn malformed_filter_fails_closed() {
        let mut r = rule(1, "*");
        r.filter = "news".into();
        let compiled = CompiledRule {
            rule: r,
            filter: Err("bad term".into()),
        };
        assert_eq!(
            compiled.evaluate(&post("news"), "news"),
            Err("malformed filter: bad term".into())
        );
    }
}
