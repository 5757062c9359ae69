//! Client connection-state tracking layered over the packet handler.
//!
//! [`SessionState`] records what the link itself does not: whether a
//! CONNACK accepted us, which subscriptions the server has confirmed,
//! when the last packet arrived, and why the connection ended. It is
//! cheaply cloneable and internally locked so a host can read from one
//! thread while another drives the writes.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;

use mqwire_core::packet::{
    ConnackVariables, ConnectVariables, PublishVariables, SubackVariables, SubscribeRequest,
    SubscribeVariables, UnsubscribeVariables,
};
use mqwire_core::{ConnectReturnCode, Header, PacketType, SubackCode};

use crate::error::LinkError;
use crate::handler::{HandlerResult, PacketHandler};
use crate::rx::PayloadReader;

#[derive(Debug, Default)]
struct Inner {
    last_rx: Option<Instant>,
    connected_at: Option<Instant>,
    pending_subs: Vec<SubscribeRequest>,
    active_subs: Vec<Bytes>,
    close_reason: Option<String>,
}

/// Shared client connection state.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    inner: Arc<Mutex<Inner>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a CONNACK has accepted the connection and no error has
    /// ended it since.
    pub fn connected(&self) -> bool {
        let inner = self.lock();
        debug_assert!(!(inner.connected_at.is_some() && inner.close_reason.is_some()));
        inner.connected_at.is_some() && inner.close_reason.is_none()
    }

    /// Why the connection ended; `None` while connected (or before any
    /// connection attempt concluded).
    pub fn close_reason(&self) -> Option<String> {
        self.lock().close_reason.clone()
    }

    /// Whether the client is waiting on the server for a SUBACK.
    pub fn pending_response(&self) -> bool {
        let inner = self.lock();
        inner.close_reason.is_none() && !inner.pending_subs.is_empty()
    }

    /// When the last tracked packet arrived.
    pub fn last_rx(&self) -> Option<Instant> {
        self.lock().last_rx
    }

    /// Topic filters the server has confirmed, in confirmation order.
    pub fn active_subscriptions(&self) -> Vec<Bytes> {
        self.lock().active_subs.clone()
    }

    /// Record the filters of a SUBSCRIBE about to be written, so the
    /// matching SUBACK can be reconciled against them.
    pub fn track_subscribe(&self, vars: &SubscribeVariables) {
        self.lock().pending_subs.extend(vars.filters.iter().cloned());
    }

    /// Record why the connection ended. Installed on Rx and Tx via
    /// [`SessionState::error_hook`]; any later reason overwrites.
    pub fn record_close(&self, reason: impl Into<String>) {
        let mut inner = self.lock();
        inner.connected_at = None;
        inner.close_reason = Some(reason.into());
    }

    /// A hook for [`Rx::set_error_hook`](crate::Rx::set_error_hook) and
    /// [`Tx::set_error_hook`](crate::Tx::set_error_hook) that records the
    /// close reason here.
    pub fn error_hook(&self) -> impl FnMut(&LinkError) + 'static {
        let state = self.clone();
        move |err: &LinkError| state.record_close(err.to_string())
    }

    /// Wrap a packet handler with this state's bookkeeping.
    pub fn tracker<H: PacketHandler>(&self, inner: H) -> SessionTracker<H> {
        SessionTracker {
            state: self.clone(),
            inner,
        }
    }

    fn touch(&self) {
        self.lock().last_rx = Some(Instant::now());
    }
}

/// A [`PacketHandler`] that maintains [`SessionState`] and forwards every
/// packet to the wrapped handler.
pub struct SessionTracker<H> {
    state: SessionState,
    inner: H,
}

impl<H> SessionTracker<H> {
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H: PacketHandler> PacketHandler for SessionTracker<H> {
    fn on_connect(&mut self, header: Header, vars: &ConnectVariables) -> HandlerResult {
        self.inner.on_connect(header, vars)
    }

    fn on_connack(&mut self, header: Header, vars: ConnackVariables) -> HandlerResult {
        self.state.touch();
        if vars.return_code != ConnectReturnCode::Accepted {
            // The receiver closes the link on this error; the close
            // reason lands through the installed error hook.
            return Err(Box::new(vars.return_code));
        }
        {
            let mut inner = self.state.lock();
            inner.connected_at = Some(Instant::now());
            inner.close_reason = None;
        }
        self.inner.on_connack(header, vars)
    }

    fn on_publish(
        &mut self,
        header: Header,
        vars: PublishVariables,
        payload: &mut PayloadReader<'_>,
    ) -> HandlerResult {
        self.inner.on_publish(header, vars, payload)
    }

    fn on_subscribe(&mut self, header: Header, vars: SubscribeVariables) -> HandlerResult {
        self.inner.on_subscribe(header, vars)
    }

    fn on_unsubscribe(&mut self, header: Header, vars: UnsubscribeVariables) -> HandlerResult {
        self.inner.on_unsubscribe(header, vars)
    }

    fn on_suback(&mut self, header: Header, vars: SubackVariables) -> HandlerResult {
        self.state.touch();
        {
            let mut inner = self.state.lock();
            if vars.return_codes.len() != inner.pending_subs.len() {
                return Err(
                    "SUBACK return code count does not match pending subscriptions".into(),
                );
            }
            let pending = std::mem::take(&mut inner.pending_subs);
            for (code, request) in vars.return_codes.iter().zip(pending) {
                match code {
                    SubackCode::Failure => {}
                    SubackCode::Granted(qos) if *qos == request.qos => {
                        inner.active_subs.push(request.filter);
                    }
                    SubackCode::Granted(_) => {
                        return Err("granted QoS does not match requested QoS".into());
                    }
                }
            }
        }
        self.inner.on_suback(header, vars)
    }

    fn on_other(&mut self, header: Header, packet_id: u16) -> HandlerResult {
        self.state.touch();
        if header.packet_type == PacketType::Disconnect {
            self.state.record_close("received graceful disconnect request");
            return Err("received graceful disconnect request".into());
        }
        self.inner.on_other(header, packet_id)
    }
}
