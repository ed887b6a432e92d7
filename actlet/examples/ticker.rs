use std::time::Duration;

use actlet::prelude::*;

struct Ticker {
    ticks: usize,
}

#[async_trait]
impl Actor for Ticker {
    async fn started(&mut self, ctx: &mut Context<Self>) {
        let emitter: Emitter<Tick> = ctx.address().clone().into();
        ctx.spawn_task(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                emitter.emit(Tick).await;
            }
        });
    }
}

#[derive(Message)]
struct Tick;

#[async_trait]
impl Handler<Tick> for Ticker {
    async fn handle(&mut self, _msg: Tick, _ctx: &mut Context<Self>) {
        self.ticks += 1;
    }
}

#[derive(Message)]
#[reply(usize)]
struct QueryTicks;

#[async_trait]
impl Handler<QueryTicks> for Ticker {
    async fn handle(&mut self, _msg: QueryTicks, _ctx: &mut Context<Self>) -> usize {
        self.ticks
    }
}

#[tokio::main]
async fn main() -> actlet::Result<()> {
    let system = System::new();
    let addr = system.spawn_actor(Ticker { ticks: 0 }).await;
    tokio::time::sleep(Duration::from_millis(350)).await;
    let ticks = addr.call(QueryTicks).await?;
    println!("TICKS: {ticks}");
    system.shutdown().await;
    Ok(())
}
