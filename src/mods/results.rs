use proc_qq::{result, EventResult};

#[result]
pub async fn on_result(result: &EventResult) -> anyhow::Result<bool> {
    match result {
        EventResult::Process(info) => {
            tracing::debug!("{} : {} : handled", info.module_id, info.handle_name);
        }
        EventResult::Exception(info, err) => {
            tracing::error!(
                "{} : {} : event dropped : {:?}",
                info.module_id,
                info.handle_name,
                err
            );
        }
    }
    Ok(false)
}
