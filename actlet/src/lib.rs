extern crate self as actlet;

use std::any::type_name;
use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[cfg(feature = "derive")]
pub use actlet_derive::Message;

pub mod prelude {
    pub use super::Action;
    pub use super::Actor;
    pub use super::Address;
    pub use super::Call;
    pub use super::Context;
    pub use super::Emit;
    pub use super::Emitter;
    pub use super::Handler;
    pub use super::Message;
    pub use super::Signal;
    pub use super::Spawn;
    pub use super::Spawner;
    pub use super::Stop;
    pub use super::System;
    pub use async_trait::async_trait;
}

/// Errors that may happen in communication with an actor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to send a message")]
    Send,
    #[error("Failed to receive a reply")]
    Recv,
}

pub type Result<T> = std::result::Result<T, Error>;

/// An actor system.
pub struct System {
    spawner: Spawner,
}

impl System {
    /// Create an actor system.
    pub fn new() -> Self {
        System {
            spawner: Spawner {
                stop_token: CancellationToken::new(),
                tracker: TaskTracker::new(),
            },
        }
    }

    /// Returns a handle which can be passed to components spawning actors
    /// and tasks on this system.
    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    /// Invoke gracefully stopping the actor system.
    ///
    /// This function doesn't wait for all tasks spawned by the system getting
    /// stopped.
    pub fn stop(self) {
        self.spawner.stop_token.cancel();
    }

    /// Stops the actor system and waits for all actors and tasks spawned on
    /// it.
    pub async fn shutdown(self) {
        self.spawner.stop_token.cancel();
        self.spawner.tracker.close();
        self.spawner.tracker.wait().await;
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Spawn for System {
    async fn spawn_actor<A>(&self, actor: A) -> Address<A>
    where
        A: Actor,
    {
        self.spawner.spawn_actor(actor).await
    }

    fn spawn_task<F>(&self, fut: F) -> CancellationToken
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawner.spawn_task(fut)
    }
}

/// A clonable handle to spawn actors and tasks on a [`System`].
#[derive(Clone)]
pub struct Spawner {
    stop_token: CancellationToken,
    tracker: TaskTracker,
}

impl Spawner {
    fn start<A: Actor>(&self, actor: A) -> Address<A> {
        let (addr, receiver) = Address::pair();
        let context = Context {
            own_addr: addr.clone(),
            spawner: self.clone(),
            stop_token: self.stop_token.child_token(),
        };
        self.tracker.spawn(async move {
            MessageLoop::new(actor, receiver, context).run().await;
        });
        addr
    }
}

#[async_trait]
impl Spawn for Spawner {
    async fn spawn_actor<A>(&self, actor: A) -> Address<A>
    where
        A: Actor,
    {
        self.start(actor)
    }

    fn spawn_task<F>(&self, fut: F) -> CancellationToken
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task_token = self.stop_token.child_token();
        let token = task_token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = fut => (),
                _ = token.cancelled() => (),
            }
        });
        task_token
    }
}

/// An actor execution context.
pub struct Context<A> {
    own_addr: Address<A>,
    spawner: Spawner,
    stop_token: CancellationToken,
}

impl<A> Context<A> {
    /// Returns the address of the actor.
    pub fn address(&self) -> &Address<A> {
        &self.own_addr
    }

    /// Stops the actor.
    pub fn stop(&mut self) {
        self.stop_token.cancel();
    }
}

#[async_trait]
impl<A> Spawn for Context<A> {
    async fn spawn_actor<B>(&self, actor: B) -> Address<B>
    where
        B: Actor,
    {
        self.spawner.start(actor)
    }

    // Tasks spawned from a context are stopped together with the actor.
    fn spawn_task<F>(&self, fut: F) -> CancellationToken
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task_token = self.stop_token.child_token();
        let token = task_token.clone();
        self.spawner.tracker.spawn(async move {
            tokio::select! {
                _ = fut => (),
                _ = token.cancelled() => (),
            }
        });
        task_token
    }
}

/// An address of an actor.
pub struct Address<A> {
    sender: mpsc::Sender<Box<dyn Dispatch<A> + Send>>,
}

impl<A> Address<A> {
    const MAX_MESSAGES: usize = 256;

    fn pair() -> (Self, mpsc::Receiver<Box<dyn Dispatch<A> + Send>>) {
        let (sender, receiver) = mpsc::channel(Self::MAX_MESSAGES);
        let addr = Address { sender };
        (addr, receiver)
    }

    /// Returns `true` if the message loop of the actor has finished.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<A: Actor> Address<A> {
    /// Runs `f` with exclusive access to the actor inside its message loop.
    ///
    /// Mainly used for checking the internal state of an actor in tests.
    pub async fn inspect<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut A) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel::<R>();
        let dispatcher = Box::new(InspectDispatcher {
            inspect: Some(f),
            sender: Some(sender),
        });
        self.sender
            .send(dispatcher)
            .await
            .map_err(|_| Error::Send)?;
        receiver.await.map_err(|_| Error::Recv)
    }
}

impl<A> Clone for Address<A> {
    fn clone(&self) -> Self {
        Address {
            sender: self.sender.clone(),
        }
    }
}

impl<A, M> From<Address<A>> for Emitter<M>
where
    A: Handler<M>,
    M: Signal + 'static,
{
    fn from(addr: Address<A>) -> Self {
        Emitter::new(addr)
    }
}

#[async_trait]
impl<A, M> Call<M> for Address<A>
where
    A: Handler<M>,
    // An message will be converted into `Box<dyn Dispatch>`.
    M: Action + 'static,
{
    async fn call(&self, msg: M) -> Result<M::Reply> {
        let (sender, receiver) = oneshot::channel::<M::Reply>();
        let dispatcher = Box::new(ActionDispatcher::new(msg, sender));
        match self.sender.send(dispatcher).await {
            Ok(_) => match receiver.await {
                Ok(reply) => Ok(reply),
                Err(_) => {
                    tracing::error!("{} stopped", type_name::<A>());
                    Err(Error::Recv)
                }
            },
            Err(_) => {
                tracing::error!("{} stopped", type_name::<A>());
                Err(Error::Send)
            }
        }
    }
}

#[async_trait]
impl<A, M> Emit<M> for Address<A>
where
    A: Handler<M>,
    M: Signal + 'static,
{
    async fn emit(&self, msg: M) {
        let dispatcher = Box::new(SignalDispatcher::new(msg));
        if self.sender.send(dispatcher).await.is_err() {
            tracing::warn!("{} stopped", type_name::<A>());
        }
    }

    fn fire(&self, msg: M) {
        use mpsc::error::TrySendError;

        let dispatcher = Box::new(SignalDispatcher::new(msg));
        match self.sender.try_send(dispatcher) {
            Ok(_) => {
                // Succeeded to send synchronously.
            }
            Err(TrySendError::Full(dispatcher)) => {
                // Need sending using an async task.
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    if sender.send(dispatcher).await.is_err() {
                        tracing::warn!("{} stopped", type_name::<A>());
                    }
                });
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("{} stopped", type_name::<A>());
            }
        }
    }
}

/// A type that implements [`Emit<M>`] for a particular message.
pub struct Emitter<M> {
    inner: std::sync::Arc<dyn Emit<M> + Send + Sync>,
}

impl<M> Emitter<M>
where
    M: Signal,
{
    pub fn new<T>(inner: T) -> Self
    where
        T: Emit<M> + Send + Sync + 'static,
    {
        Emitter {
            inner: std::sync::Arc::new(inner),
        }
    }
}

impl<M> Clone for Emitter<M> {
    fn clone(&self) -> Self {
        Emitter {
            inner: self.inner.clone(),
        }
    }
}

#[async_trait]
impl<M> Emit<M> for Emitter<M>
where
    M: Signal,
{
    async fn emit(&self, msg: M) {
        self.inner.emit(msg).await
    }

    fn fire(&self, msg: M) {
        self.inner.fire(msg);
    }
}

/// A message to stop an actor.
pub struct Stop;
impl Message for Stop {
    type Reply = ();
}
impl Signal for Stop {}

#[async_trait]
impl<A: Actor> Handler<Stop> for A {
    async fn handle(&mut self, _msg: Stop, ctx: &mut Context<Self>) {
        ctx.stop();
    }
}

// traits

/// A trait that every actor must implement.
#[async_trait]
pub trait Actor
where
    Self: Send + Sized,
    // An actor will be sent to a dedicated task created by `tokio::spawn()`.
    // And the following constraint is needed for the same reason as
    // `std::thread::spawn()`.
    Self: 'static,
{
    /// Called when the actor gets started running on a dedicated task.
    #[allow(unused_variables)]
    async fn started(&mut self, ctx: &mut Context<Self>) {}

    /// Called when the actor is going to stop, before the remaining messages
    /// are processed.
    #[allow(unused_variables)]
    async fn stopping(&mut self, ctx: &mut Context<Self>) {}

    /// Called when the actor stopped.
    #[allow(unused_variables)]
    async fn stopped(&mut self, ctx: &mut Context<Self>) {}
}

/// A trait to spawn a new asynchronous task.
#[async_trait]
pub trait Spawn: Sized {
    /// Spawns a new asynchronous task dedicated for an actor.
    async fn spawn_actor<A>(&self, actor: A) -> Address<A>
    where
        A: Actor;

    /// Spawns a new asynchronous task dedicated for a `Future`.
    ///
    /// The returned token cancels the task.
    fn spawn_task<F>(&self, fut: F) -> CancellationToken
    where
        F: Future<Output = ()> + Send + 'static;
}

/// A trait that every message must implement.
pub trait Message: Send {
    /// The type of reply for this message.
    type Reply: Send;
}

/// A trait that every message sent by [`Call<M>`] must implement.
pub trait Action: Message {}

/// A trait to send a message and wait for its reply.
#[async_trait]
pub trait Call<M: Action> {
    /// Sends a message and waits for its reply.
    ///
    /// The `msg` will be lost if the actor has already stopped.
    async fn call(&self, msg: M) -> Result<M::Reply>;
}

/// A trait that every message sent by [`Emit<M>`] must implement.
pub trait Signal: Message<Reply = ()> {}

/// A trait to send every message.
#[async_trait]
pub trait Emit<M: Signal> {
    /// Sends a message.
    ///
    /// The `msg` will be lost if the actor has already stopped.
    async fn emit(&self, msg: M);

    /// Sends a message synchronously if possible.
    ///
    /// This function is useful when a message has to be sent outside `async fn`
    /// and `async` blocks such as `Drop::drop()`.
    ///
    /// The `msg` will be lost if the actor has already stopped.
    #[allow(unused_variables)]
    fn fire(&self, msg: M) {
        unimplemented!("Emit::fire");
    }
}

/// A trait to handle a message.
#[async_trait]
pub trait Handler<M>
where
    Self: Actor,
    M: Message,
{
    /// Performs a computation specified by a message and optionally returns a
    /// result of the computation.
    async fn handle(&mut self, msg: M, ctx: &mut Context<Self>) -> M::Reply;
}

// private types

struct MessageLoop<A> {
    actor: A,
    receiver: mpsc::Receiver<Box<dyn Dispatch<A> + Send>>,
    context: Context<A>,
}

impl<A: Actor> MessageLoop<A> {
    fn new(
        actor: A,
        receiver: mpsc::Receiver<Box<dyn Dispatch<A> + Send>>,
        context: Context<A>,
    ) -> Self {
        MessageLoop {
            actor,
            receiver,
            context,
        }
    }

    async fn run(&mut self) {
        self.actor.started(&mut self.context).await;
        let stop_token = self.context.stop_token.clone();
        loop {
            tokio::select! {
                Some(dispatch) = self.receiver.recv() => {
                    dispatch.dispatch(&mut self.actor, &mut self.context).await;
                }
                _ = stop_token.cancelled() => {
                    self.receiver.close();
                    break;
                }
                else => break,
            }
        }
        self.actor.stopping(&mut self.context).await;
        // Ensure that the remaining messages are processed before the stop.
        while let Some(dispatch) = self.receiver.recv().await {
            dispatch.dispatch(&mut self.actor, &mut self.context).await;
        }
        self.actor.stopped(&mut self.context).await;
    }
}

#[async_trait]
trait Dispatch<A> {
    async fn dispatch(self: Box<Self>, actor: &mut A, ctx: &mut Context<A>);
}

struct ActionDispatcher<M>
where
    M: Action,
{
    message: Option<M>,
    sender: Option<oneshot::Sender<M::Reply>>,
}

impl<M> ActionDispatcher<M>
where
    M: Action,
{
    fn new(msg: M, sender: oneshot::Sender<M::Reply>) -> Self {
        ActionDispatcher {
            message: Some(msg),
            sender: Some(sender),
        }
    }
}

#[async_trait]
impl<A, M> Dispatch<A> for ActionDispatcher<M>
where
    A: Handler<M>,
    M: Action,
{
    async fn dispatch(mut self: Box<Self>, actor: &mut A, ctx: &mut Context<A>) {
        let (Some(message), Some(sender)) = (self.message.take(), self.sender.take()) else {
            return;
        };
        let reply = actor.handle(message, ctx).await;
        if sender.send(reply).is_err() {
            tracing::error!("Failed to send, {} stopped", type_name::<A>());
        }
    }
}

struct SignalDispatcher<M>
where
    M: Signal,
{
    message: Option<M>,
}

impl<M> SignalDispatcher<M>
where
    M: Signal,
{
    fn new(msg: M) -> Self {
        SignalDispatcher { message: Some(msg) }
    }
}

#[async_trait]
impl<A, M> Dispatch<A> for SignalDispatcher<M>
where
    A: Handler<M>,
    M: Signal,
{
    async fn dispatch(mut self: Box<Self>, actor: &mut A, ctx: &mut Context<A>) {
        if let Some(message) = self.message.take() {
            actor.handle(message, ctx).await;
        }
    }
}

struct InspectDispatcher<F, R> {
    inspect: Option<F>,
    sender: Option<oneshot::Sender<R>>,
}

#[async_trait]
impl<A, F, R> Dispatch<A> for InspectDispatcher<F, R>
where
    A: Actor,
    F: FnOnce(&mut A) -> R + Send + 'static,
    R: Send + 'static,
{
    async fn dispatch(mut self: Box<Self>, actor: &mut A, _ctx: &mut Context<A>) {
        if let (Some(inspect), Some(sender)) = (self.inspect.take(), self.sender.take()) {
            let _ = sender.send(inspect(actor));
        }
    }
}

// <coverage:exclude>
#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        count: usize,
    }

    #[async_trait]
    impl Actor for Counter {}

    #[derive(Message)]
    #[reply(usize)]
    struct Add(usize);

    #[async_trait]
    impl Handler<Add> for Counter {
        async fn handle(&mut self, msg: Add, _ctx: &mut Context<Self>) -> usize {
            self.count += msg.0;
            self.count
        }
    }

    #[derive(Message)]
    struct Reset;

    #[async_trait]
    impl Handler<Reset> for Counter {
        async fn handle(&mut self, _msg: Reset, _ctx: &mut Context<Self>) {
            self.count = 0;
        }
    }

    #[tokio::test]
    async fn test_call_and_emit() {
        let system = System::new();
        let addr = system.spawn_actor(Counter { count: 1 }).await;
        assert_eq!(addr.call(Add(2)).await.unwrap(), 3);
        addr.emit(Reset).await;
        let count = addr.inspect(|actor| actor.count).await.unwrap();
        assert_eq!(count, 0);
        system.shutdown().await;
        assert!(addr.is_closed());
    }

    #[tokio::test]
    async fn test_spawn_task_cancel() {
        let system = System::new();
        let (tx, rx) = oneshot::channel::<()>();
        let token = system.spawn_task(async move {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            let _ = tx.send(());
        });
        token.cancel();
        // The sender is dropped without sending when the task is cancelled.
        assert!(rx.await.is_err());
        system.shutdown().await;
    }
}
// </coverage:exclude>
