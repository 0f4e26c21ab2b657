//! Access gate
//!
//! Decides, per view request, whether to show a loading indicator, redirect,
//! or render. The redirect is issued through the [`Navigator`] by the same
//! call that produces the decision, so no protected view is rendered while a
//! redirect is pending.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::identity::AuthState;

/// Application views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Login,
    Dashboard,
    Clients,
    Interactions,
    Opportunities,
    Tasks,
    Users,
}

impl View {
    /// Where authenticated principals land
    pub const DEFAULT: View = View::Dashboard;

    pub fn path(&self) -> &'static str {
        match self {
            Self::Login => "/login",
            Self::Dashboard => "/",
            Self::Clients => "/clients",
            Self::Interactions => "/interactions",
            Self::Opportunities => "/opportunities",
            Self::Tasks => "/tasks",
            Self::Users => "/users",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Navigation side effects
pub trait Navigator: Send + Sync {
    fn navigate(&self, to: View);
}

/// Navigator that tracks the current view in a watch channel
pub struct ViewRouter {
    current: watch::Sender<View>,
}

impl ViewRouter {
    pub fn new(initial: View) -> Self {
        Self {
            current: watch::Sender::new(initial),
        }
    }

    pub fn current(&self) -> View {
        *self.current.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<View> {
        self.current.subscribe()
    }
}

impl Navigator for ViewRouter {
    fn navigate(&self, to: View) {
        let from = self.current.send_replace(to);
        debug!("navigate {} -> {}", from, to);
    }
}

/// Outcome of gating a view request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Authentication has not settled; show a neutral indicator
    Loading,
    /// Navigate elsewhere; nothing is rendered
    Redirect(View),
    Render(View),
}

/// Pure gating rule
pub fn decide(auth: &AuthState, requested: View) -> GateDecision {
    match (auth, requested) {
        (AuthState::Checking, _) => GateDecision::Loading,
        (AuthState::SignedOut, View::Login) => GateDecision::Render(View::Login),
        (AuthState::SignedOut, _) => GateDecision::Redirect(View::Login),
        (AuthState::SignedIn(_), View::Login) => GateDecision::Redirect(View::DEFAULT),
        (AuthState::SignedIn(_), view) => GateDecision::Render(view),
    }
}

pub struct AccessGate<N: Navigator + ?Sized> {
    navigator: Arc<N>,
}

impl<N: Navigator + ?Sized> AccessGate<N> {
    pub fn new(navigator: Arc<N>) -> Self {
        Self { navigator }
    }

    /// Gate a request and perform any redirect it calls for
    pub fn check(&self, auth: &AuthState, requested: View) -> GateDecision {
        let decision = decide(auth, requested);
        if let GateDecision::Redirect(to) = decision {
            self.navigator.navigate(to);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Principal, Role};

    fn signed_in() -> AuthState {
        AuthState::SignedIn(Principal {
            id: "u1".into(),
            username: "ana".into(),
            name: "Ana".into(),
            email: "ana@example.com".into(),
            role: Role::User,
        })
    }

    #[test]
    fn test_checking_never_redirects() {
        let router = Arc::new(ViewRouter::new(View::Clients));
        let gate = AccessGate::new(router.clone());
        assert_eq!(gate.check(&AuthState::Checking, View::Clients), GateDecision::Loading);
        assert_eq!(gate.check(&AuthState::Checking, View::Login), GateDecision::Loading);
        assert_eq!(router.current(), View::Clients);
    }

    #[test]
    fn test_signed_out_redirects_to_login() {
        let router = Arc::new(ViewRouter::new(View::Tasks));
        let gate = AccessGate::new(router.clone());
        assert_eq!(
            gate.check(&AuthState::SignedOut, View::Tasks),
            GateDecision::Redirect(View::Login)
        );
        assert_eq!(router.current(), View::Login);
        assert_eq!(
            gate.check(&AuthState::SignedOut, View::Login),
            GateDecision::Render(View::Login)
        );
    }

    #[test]
    fn test_signed_in_leaves_login() {
        let router = Arc::new(ViewRouter::new(View::Login));
        let gate = AccessGate::new(router.clone());
        assert_eq!(
            gate.check(&signed_in(), View::Login),
            GateDecision::Redirect(View::Dashboard)
        );
        assert_eq!(router.current(), View::Dashboard);
        assert_eq!(
            gate.check(&signed_in(), View::Opportunities),
            GateDecision::Render(View::Opportunities)
        );
    }

    #[test]
    fn test_redirect_wakes_view_watchers() {
        let router = Arc::new(ViewRouter::new(View::Clients));
        let gate = AccessGate::new(router.clone());
        let mut views = router.watch();
        let mut changed = tokio_test::task::spawn(views.changed());
        tokio_test::assert_pending!(changed.poll());

        gate.check(&AuthState::SignedOut, View::Clients);
        assert!(changed.is_woken());
        tokio_test::assert_ready_ok!(changed.poll());
        drop(changed);
        assert_eq!(*views.borrow_and_update(), View::Login);
    }
}
