//! FIFO of application commands, one in flight at a time.

use std::collections::{HashSet, VecDeque};

use tokio::sync::oneshot;

use crate::app::{AppCommand, Service};
use crate::core::CommandError;

/// What the in-flight command is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueState {
    /// Nothing in flight.
    #[default]
    QueueEmpty,
    /// `SERVICE_CHALLENGE` sent for the head command's service.
    ServiceChallenge,
    /// `ACTIVATE_SERVICE` sent for the head command's service.
    ActivatingService,
    /// The head command itself was sent.
    WaitingForResponse,
}

/// The next message needed to make progress on the head command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Service is active: send the command.
    Command,
    /// Service has no password: activate it directly.
    ActivateService(Service),
    /// Service needs a password: request a salt first.
    ServiceChallenge(Service),
}

type Completer = Box<dyn FnOnce(Result<Vec<u8>, CommandError>) + Send>;

/// A type-erased command plus the handle that completes its caller.
pub struct CommandRequest {
    name: &'static str,
    service: Service,
    command_id: u16,
    response_length: Option<usize>,
    request_crc: bool,
    response_crc: bool,
    payload: Vec<u8>,
    completer: Completer,
}

impl CommandRequest {
    /// Wrap a command; the receiver resolves once the pump answered or the
    /// session ended.
    pub fn new<C: AppCommand>(
        command: C,
    ) -> (Self, oneshot::Receiver<Result<C::Response, CommandError>>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            name: command.name(),
            service: command.service(),
            command_id: command.command_id(),
            response_length: command.response_length(),
            request_crc: command.request_crc(),
            response_crc: command.response_crc(),
            payload: command.encode_request(),
            completer: Box::new(move |result| {
                let decoded = result.and_then(|body| {
                    command.decode_response(&body).map_err(CommandError::from)
                });
                // caller may have stopped waiting
                let _ = tx.send(decoded);
            }),
        };
        (request, rx)
    }

    /// Command name for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Target service.
    pub fn service(&self) -> Service {
        self.service
    }

    /// Command id.
    pub fn command_id(&self) -> u16 {
        self.command_id
    }

    /// Expected response body length.
    pub fn response_length(&self) -> Option<usize> {
        self.response_length
    }

    /// Request carries a CRC.
    pub fn request_crc(&self) -> bool {
        self.request_crc
    }

    /// Response carries a CRC.
    pub fn response_crc(&self) -> bool {
        self.response_crc
    }

    /// Encoded request payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Hand the outcome to the caller.
    pub fn complete(self, result: Result<Vec<u8>, CommandError>) {
        (self.completer)(result)
    }
}

impl std::fmt::Debug for CommandRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRequest")
            .field("name", &self.name)
            .field("service", &self.service)
            .field("command_id", &self.command_id)
            .finish_non_exhaustive()
    }
}

/// Pending commands, the activation state of services and what the head
/// command waits for.
#[derive(Debug, Default)]
pub struct CommandQueue {
    state: QueueState,
    pending: VecDeque<CommandRequest>,
    activated: HashSet<Service>,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current queue state.
    pub fn state(&self) -> QueueState {
        self.state
    }

    /// Set the queue state.
    pub fn set_state(&mut self, state: QueueState) {
        self.state = state;
    }

    /// Returns true if nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.state == QueueState::QueueEmpty
    }

    /// Number of queued commands, including the head.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if no command is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Append a command.
    pub fn push(&mut self, request: CommandRequest) {
        self.pending.push_back(request);
    }

    /// The command currently being worked on.
    pub fn head(&self) -> Option<&CommandRequest> {
        self.pending.front()
    }

    /// Remove the head command.
    pub fn pop(&mut self) -> Option<CommandRequest> {
        self.pending.pop_front()
    }

    /// Record that `service` is active for the rest of the session.
    pub fn mark_activated(&mut self, service: Service) {
        self.activated.insert(service);
    }

    /// Returns true if `service` was activated this session.
    pub fn is_activated(&self, service: Service) -> bool {
        self.activated.contains(&service)
    }

    /// Decide how to continue with the head command.
    pub fn next_step(&self) -> Option<NextStep> {
        let service = self.head()?.service();
        Some(if self.is_activated(service) {
            NextStep::Command
        } else if service.password().is_none() {
            NextStep::ActivateService(service)
        } else {
            NextStep::ServiceChallenge(service)
        })
    }

    /// Fail every queued command and forget activated services.
    pub fn reset(&mut self, error: CommandError) {
        self.state = QueueState::QueueEmpty;
        self.activated.clear();
        for request in self.pending.drain(..) {
            request.complete(Err(error.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::RawCommand;

    #[tokio::test]
    async fn test_fifo_and_completion() {
        let mut queue = CommandQueue::new();
        let (a, rx_a) = CommandRequest::new(RawCommand::new(Service::Status, 1, vec![]));
        let (b, rx_b) = CommandRequest::new(RawCommand::new(Service::History, 2, vec![]));
        queue.push(a);
        queue.push(b);

        assert_eq!(queue.head().unwrap().command_id(), 1);
        queue.pop().unwrap().complete(Ok(vec![7]));
        assert_eq!(queue.head().unwrap().command_id(), 2);
        queue.pop().unwrap().complete(Err(CommandError::App(0x1234)));

        assert_eq!(rx_a.await.unwrap(), Ok(vec![7]));
        assert_eq!(rx_b.await.unwrap(), Err(CommandError::App(0x1234)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_next_step() {
        let mut queue = CommandQueue::new();
        assert_eq!(queue.next_step(), None);

        let (plain, _rx) = CommandRequest::new(RawCommand::new(Service::Status, 1, vec![]));
        queue.push(plain);
        assert_eq!(queue.next_step(), Some(NextStep::ActivateService(Service::Status)));
        queue.mark_activated(Service::Status);
        assert_eq!(queue.next_step(), Some(NextStep::Command));

        queue.pop();
        let (protected, _rx) = CommandRequest::new(RawCommand::new(Service::RemoteControl, 2, vec![]));
        queue.push(protected);
        assert_eq!(queue.next_step(), Some(NextStep::ServiceChallenge(Service::RemoteControl)));
    }

    #[tokio::test]
    async fn test_reset_fails_everything() {
        let mut queue = CommandQueue::new();
        let (a, rx_a) = CommandRequest::new(RawCommand::new(Service::Status, 1, vec![]));
        let (b, rx_b) = CommandRequest::new(RawCommand::new(Service::Status, 2, vec![]));
        queue.push(a);
        queue.push(b);
        queue.mark_activated(Service::Status);
        queue.set_state(QueueState::WaitingForResponse);

        queue.reset(CommandError::NotConnected);

        assert!(queue.is_idle());
        assert!(!queue.is_activated(Service::Status));
        assert_eq!(rx_a.await.unwrap(), Err(CommandError::NotConnected));
        assert_eq!(rx_b.await.unwrap(), Err(CommandError::NotConnected));
    }
}
