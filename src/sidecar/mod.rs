//! Launches `daprd` for a flow and waits until it can serve binding calls.

pub mod metadata;
pub mod options;
pub mod process;

pub use metadata::{MetadataResponse, RegisteredComponent};
pub use options::{ComponentKind, ComponentRegistration, SidecarOptions};
pub use process::RunningSidecar;

use crate::flow::Step;

/// Setup step: starts a sidecar from `options` and hands it to the flow.
///
/// The step is named after the sidecar's app id, which is also the name later
/// steps use to look up its ports. A sidecar that fails to start fails the step.
pub fn run(options: SidecarOptions) -> Step {
    let name = options.app_id.clone();
    Step::new(&name, move |ctx| async move {
        let sidecar = RunningSidecar::start(options).await?;
        let app_id = sidecar.app_id().to_string();
        ctx.register_sidecar(&app_id, Box::new(sidecar)).await
    })
}
