//! Per-visitor session state machine and the store that scopes it to a visitor context.
//!
//! States: `Anonymous` (initial) and `Authenticated(identity)`.
//! - Anonymous + successful login -> Authenticated
//! - Anonymous + failed login -> Anonymous (reason returned to the caller)
//! - Authenticated + logout -> Anonymous
//! A context idle past its limit is discarded; the visitor then starts fresh. Anonymous
//! contexts get a shorter limit than authenticated ones, and the id is replaced on login.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use base64::Engine;
use parking_lot::RwLock;

use super::authenticator::{authenticate, RejectionReason};
use crate::roster::{Roster, RosterRecord};
use crate::tprintln;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticated(RosterRecord),
}

/// What the presentation layer should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Anonymous,
    Authenticated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self { Self::default() }

    pub fn state(&self) -> &SessionState { &self.state }

    pub fn phase(&self) -> Phase {
        match self.state {
            SessionState::Anonymous => Phase::Anonymous,
            SessionState::Authenticated(_) => Phase::Authenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool { self.phase() == Phase::Authenticated }

    pub fn identity(&self) -> Option<&RosterRecord> {
        match &self.state {
            SessionState::Authenticated(r) => Some(r),
            SessionState::Anonymous => None,
        }
    }

    /// Authenticate `candidate` against `roster` and move to Authenticated on success.
    /// On failure the state is left exactly as it was.
    pub fn login(&mut self, candidate: &str, roster: &Roster) -> Result<RosterRecord, RejectionReason> {
        let record = authenticate(candidate, roster)?;
        self.state = SessionState::Authenticated(record.clone());
        Ok(record)
    }

    /// Back to Anonymous. Returns whether the session was authenticated.
    pub fn logout(&mut self) -> bool {
        let was = self.is_authenticated();
        self.state = SessionState::Anonymous;
        was
    }
}

/// One visitor's context: the session plus the CSRF token its forms must echo.
#[derive(Debug, Clone)]
pub struct VisitorContext {
    pub session: Session,
    pub csrf: String,
    last_seen: Instant,
}

/// Result of `SessionStore::touch` and `SessionStore::rotate`.
#[derive(Debug, Clone)]
pub struct Touched {
    pub sid: String,
    pub created: bool,
    pub session: Session,
    pub csrf: String,
}

fn gen_id() -> Result<String> {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow!("session id generation failed: {e}"))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Enough of an id to correlate log lines without printing the bearer value.
fn short(sid: &str) -> &str {
    sid.get(..6).unwrap_or(sid)
}

type ContextMap = HashMap<String, VisitorContext>;

/// Visitor contexts keyed by an opaque id. Contexts are never shared between ids.
///
/// Authenticated contexts live for `idle` without activity. Anonymous ones get the
/// shorter `anonymous_idle` and there are at most `max_anonymous` of them at a time.
pub struct SessionStore {
    idle: Duration,
    anonymous_idle: Duration,
    max_anonymous: usize,
    contexts: RwLock<ContextMap>,
}

impl SessionStore {
    pub fn new(idle: Duration, anonymous_idle: Duration, max_anonymous: usize) -> Self {
        Self { idle, anonymous_idle, max_anonymous: max_anonymous.max(1), contexts: RwLock::new(HashMap::new()) }
    }

    fn limit_for(&self, ctx: &VisitorContext) -> Duration {
        if ctx.session.is_authenticated() { self.idle } else { self.anonymous_idle }
    }

    fn is_live(&self, ctx: &VisitorContext, now: Instant) -> bool {
        now.saturating_duration_since(ctx.last_seen) < self.limit_for(ctx)
    }

    fn insert_new(&self, map: &mut ContextMap, session: Session, now: Instant) -> Result<Touched> {
        let sid = gen_id()?;
        let csrf = gen_id()?;
        let out = Touched { sid: sid.clone(), created: true, session: session.clone(), csrf: csrf.clone() };
        map.insert(sid, VisitorContext { session, csrf, last_seen: now });
        Ok(out)
    }

    /// Keep the anonymous population under the cap: drop expired contexts first,
    /// then the least recently seen anonymous ones.
    fn make_room(&self, map: &mut ContextMap, now: Instant) {
        let anonymous = map.values().filter(|c| !c.session.is_authenticated()).count();
        if anonymous < self.max_anonymous {
            return;
        }
        map.retain(|_, ctx| self.is_live(ctx, now));
        let mut oldest: Vec<(String, Instant)> = map
            .iter()
            .filter(|(_, c)| !c.session.is_authenticated())
            .map(|(sid, c)| (sid.clone(), c.last_seen))
            .collect();
        if oldest.len() < self.max_anonymous {
            return;
        }
        oldest.sort_by_key(|(_, seen)| *seen);
        let excess = oldest.len() + 1 - self.max_anonymous;
        for (sid, _) in oldest.into_iter().take(excess) {
            map.remove(&sid);
        }
        tprintln!("session.evicted anonymous={}", excess);
    }

    /// Existing live context for `sid`, or a fresh Anonymous one under a new id.
    pub fn touch(&self, sid: Option<&str>) -> Result<Touched> {
        self.touch_at(sid, Instant::now())
    }

    pub fn touch_at(&self, sid: Option<&str>, now: Instant) -> Result<Touched> {
        let mut map = self.contexts.write();
        if let Some(sid) = sid {
            match map.get(sid).map(|ctx| self.is_live(ctx, now)) {
                Some(true) => {
                    if let Some(ctx) = map.get_mut(sid) {
                        ctx.last_seen = now;
                        return Ok(Touched { sid: sid.to_string(), created: false, session: ctx.session.clone(), csrf: ctx.csrf.clone() });
                    }
                }
                Some(false) => {
                    map.remove(sid);
                    tprintln!("session.expired sid={}..", short(sid));
                }
                None => {}
            }
        }
        self.make_room(&mut map, now);
        let out = self.insert_new(&mut map, Session::new(), now)?;
        tprintln!("session.new sid={}.. contexts={}", short(&out.sid), map.len());
        Ok(out)
    }

    /// Move the live context for `sid` to a new id with a new CSRF token. The old id stops
    /// working immediately. `None` when `sid` is unknown or expired.
    pub fn rotate(&self, sid: &str) -> Result<Option<Touched>> {
        self.rotate_at(sid, Instant::now())
    }

    pub fn rotate_at(&self, sid: &str, now: Instant) -> Result<Option<Touched>> {
        let mut map = self.contexts.write();
        let Some(ctx) = map.remove(sid) else { return Ok(None) };
        if !self.is_live(&ctx, now) {
            return Ok(None);
        }
        let out = self.insert_new(&mut map, ctx.session, now)?;
        tprintln!("session.rotated from={}.. to={}..", short(sid), short(&out.sid));
        Ok(Some(out))
    }

    /// Forget `sid`. Returns the session it held, if any.
    pub fn remove(&self, sid: &str) -> Option<Session> {
        self.contexts.write().remove(sid).map(|ctx| ctx.session)
    }

    /// Run `f` against the live context for `sid`. `None` when the id is unknown or expired.
    pub fn with_context<R>(&self, sid: &str, f: impl FnOnce(&mut VisitorContext) -> R) -> Option<R> {
        self.with_context_at(sid, Instant::now(), f)
    }

    pub fn with_context_at<R>(&self, sid: &str, now: Instant, f: impl FnOnce(&mut VisitorContext) -> R) -> Option<R> {
        let mut map = self.contexts.write();
        if !self.is_live(map.get(sid)?, now) {
            map.remove(sid);
            return None;
        }
        let ctx = map.get_mut(sid)?;
        ctx.last_seen = now;
        Some(f(ctx))
    }

    /// Compare a submitted CSRF token against the one issued to a live `sid`.
    pub fn csrf_matches(&self, sid: &str, provided: &str) -> bool {
        self.csrf_matches_at(sid, provided, Instant::now())
    }

    pub fn csrf_matches_at(&self, sid: &str, provided: &str, now: Instant) -> bool {
        let map = self.contexts.read();
        match map.get(sid) {
            Some(ctx) => self.is_live(ctx, now) && !provided.is_empty() && ctx.csrf == provided,
            None => false,
        }
    }

    /// Discard contexts idle longer than their limit. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut map = self.contexts.write();
        let before = map.len();
        map.retain(|_, ctx| self.is_live(ctx, now));
        before - map.len()
    }

    pub fn len(&self) -> usize { self.contexts.read().len() }

    pub fn is_empty(&self) -> bool { self.contexts.read().is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::RosterError;

    fn roster() -> Roster {
        Roster::well_formed(
            vec![RosterRecord::new("2022123456", "Ana Paredes")],
            vec!["codigo".into(), "nombres".into()],
        )
    }

    #[test]
    fn fresh_session_is_anonymous() {
        let s = Session::new();
        assert_eq!(s.phase(), Phase::Anonymous);
        assert!(s.identity().is_none());
    }

    #[test]
    fn successful_login_authenticates() {
        let mut s = Session::new();
        let who = s.login(" 2022123456", &roster()).unwrap();
        assert_eq!(who.display_name, "Ana Paredes");
        assert!(s.is_authenticated());
        assert_eq!(s.identity(), Some(&who));
    }

    #[test]
    fn failed_login_leaves_state_unchanged() {
        let mut s = Session::new();
        assert_eq!(s.login("2022999999", &roster()), Err(RejectionReason::CodeNotFound));
        assert_eq!(s, Session::new());

        let mut authed = Session::new();
        authed.login("2022123456", &roster()).unwrap();
        let before = authed.clone();
        assert!(authed.login("nope", &roster()).is_err());
        assert_eq!(authed, before);
    }

    #[test]
    fn degraded_roster_keeps_visitor_anonymous() {
        let mut s = Session::new();
        let bad = Roster::degraded(RosterError::SourceUnavailable("offline".into()));
        assert!(s.login("2022123456", &bad).is_err());
        assert_eq!(s.phase(), Phase::Anonymous);
    }

    #[test]
    fn logout_returns_to_anonymous() {
        let mut s = Session::new();
        s.login("2022123456", &roster()).unwrap();
        assert!(s.logout());
        assert_eq!(s.phase(), Phase::Anonymous);
        assert!(!s.logout());
    }

    const HOUR: Duration = Duration::from_secs(3600);

    fn store() -> SessionStore {
        SessionStore::new(HOUR, Duration::from_secs(60), 100)
    }

    fn login_in(store: &SessionStore, sid: &str) {
        store.with_context(sid, |ctx| ctx.session.login("2022123456", &roster()).map(|_| ())).unwrap().unwrap();
    }

    #[test]
    fn store_creates_on_first_touch_and_reuses() {
        let store = store();
        let first = store.touch(None).unwrap();
        assert!(first.created);
        let again = store.touch(Some(&first.sid)).unwrap();
        assert!(!again.created);
        assert_eq!(again.sid, first.sid);
        assert_eq!(again.csrf, first.csrf);
        let unknown = store.touch(Some("forged")).unwrap();
        assert!(unknown.created);
        assert_ne!(unknown.sid, "forged");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn ids_are_random_per_context() {
        let store = store();
        let a = store.touch(None).unwrap();
        let b = store.touch(None).unwrap();
        assert_ne!(a.sid, b.sid);
        assert_ne!(a.csrf, b.csrf);
        assert_ne!(a.sid, a.csrf);
        assert_eq!(a.sid.len(), 43);
    }

    #[test]
    fn contexts_are_isolated() {
        let store = store();
        let a = store.touch(None).unwrap();
        let b = store.touch(None).unwrap();
        login_in(&store, &a.sid);
        assert!(store.touch(Some(&a.sid)).unwrap().session.is_authenticated());
        assert!(!store.touch(Some(&b.sid)).unwrap().session.is_authenticated());
        assert!(store.csrf_matches(&a.sid, &a.csrf));
        assert!(!store.csrf_matches(&a.sid, &b.csrf));
        assert!(!store.csrf_matches(&a.sid, ""));
    }

    #[test]
    fn rotation_retires_the_pre_login_id() {
        let store = store();
        let pre = store.touch(None).unwrap();
        login_in(&store, &pre.sid);
        let post = store.rotate(&pre.sid).unwrap().unwrap();
        assert_ne!(post.sid, pre.sid);
        assert_ne!(post.csrf, pre.csrf);
        assert!(post.session.is_authenticated());

        let replay = store.touch(Some(&pre.sid)).unwrap();
        assert!(replay.created);
        assert!(!replay.session.is_authenticated());
        assert!(!store.csrf_matches(&pre.sid, &pre.csrf));
        assert!(store.touch(Some(&post.sid)).unwrap().session.is_authenticated());
        assert!(store.rotate("forged").unwrap().is_none());
    }

    #[test]
    fn remove_forgets_the_context() {
        let store = store();
        let a = store.touch(None).unwrap();
        login_in(&store, &a.sid);
        assert!(store.remove(&a.sid).unwrap().is_authenticated());
        assert!(store.remove(&a.sid).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn idle_contexts_expire() {
        let store = store();
        let t0 = Instant::now();
        let a = store.touch_at(None, t0).unwrap();
        let later = store.touch_at(Some(&a.sid), t0 + Duration::from_secs(61)).unwrap();
        assert!(later.created);
        assert_ne!(later.sid, a.sid);
        assert_eq!(store.len(), 1);
        assert_eq!(store.sweep_at(t0 + Duration::from_secs(200)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn anonymous_contexts_expire_before_authenticated_ones() {
        let store = store();
        let t0 = Instant::now();
        let anon = store.touch_at(None, t0).unwrap();
        let authed = store.touch_at(None, t0).unwrap();
        store.with_context_at(&authed.sid, t0, |ctx| ctx.session.login("2022123456", &roster())).unwrap().unwrap();

        assert_eq!(store.sweep_at(t0 + Duration::from_secs(120)), 1);
        assert!(store.csrf_matches_at(&authed.sid, &authed.csrf, t0 + Duration::from_secs(120)));
        assert!(!store.csrf_matches_at(&anon.sid, &anon.csrf, t0 + Duration::from_secs(120)));
        assert_eq!(store.sweep_at(t0 + HOUR), 1);
    }

    #[test]
    fn cookieless_request_loop_is_capped() {
        let store = SessionStore::new(HOUR, HOUR, 5);
        let t0 = Instant::now();
        let mut issued = Vec::new();
        for i in 0..50u64 {
            issued.push(store.touch_at(None, t0 + Duration::from_millis(i)).unwrap());
        }
        assert_eq!(store.len(), 5);
        // the newest ids survive, the oldest were evicted
        assert!(!store.touch_at(Some(&issued[49].sid), t0 + Duration::from_secs(1)).unwrap().created);
        assert!(store.csrf_matches_at(&issued[48].sid, &issued[48].csrf, t0 + Duration::from_secs(1)));
        assert!(!store.csrf_matches_at(&issued[0].sid, &issued[0].csrf, t0 + Duration::from_secs(1)));
    }

    #[test]
    fn cap_never_evicts_authenticated_contexts() {
        let store = SessionStore::new(HOUR, HOUR, 2);
        let t0 = Instant::now();
        let authed = store.touch_at(None, t0).unwrap();
        store.with_context_at(&authed.sid, t0, |ctx| ctx.session.login("2022123456", &roster())).unwrap().unwrap();
        for i in 1..20u64 {
            store.touch_at(None, t0 + Duration::from_millis(i)).unwrap();
        }
        assert!(store.touch_at(Some(&authed.sid), t0 + Duration::from_secs(1)).unwrap().session.is_authenticated());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn expired_unswept_context_refuses_login_and_stays_dead() {
        let store = store();
        let t0 = Instant::now();
        let a = store.touch_at(None, t0).unwrap();
        let late = t0 + Duration::from_secs(61);
        assert!(!store.csrf_matches_at(&a.sid, &a.csrf, late));
        let outcome = store.with_context_at(&a.sid, late, |ctx| ctx.session.login("2022123456", &roster()));
        assert!(outcome.is_none());
        // the late access must not have revived it
        assert!(store.touch_at(Some(&a.sid), late).unwrap().created);
        assert!(store.rotate_at(&a.sid, late).unwrap().is_none());
    }
}
