use common::async_std::task::block_on;
use common::errors::*;

struct NoLocalState;

#[async_trait::async_trait]
impl cmg::LocalStateStore for NoLocalState {
    async fn load(&self) -> Result<Option<cmg::InitArgs>> {
        Ok(None)
    }
    async fn save(&self, _args: &cmg::InitArgs) -> Result<()> {
        Ok(())
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

async fn run() -> Result<()> {
    common::init_logging();

    let node = meta::Node::new(1, 16, NoLocalState);

    match node.cluster_state().await {
        Some(state) => println!("joined cluster {:?}", state.cluster_tag.cluster_name),
        None => println!("node {} is uninitialized; awaiting cluster init", node.node_id),
    }

    Ok(())
}

fn main() -> Result<()> {
    block_on(run())
}
