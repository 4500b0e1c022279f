//! Turns declared tenant resources into provider-specific artifacts.
//!
//! The pipeline runs in three stages for every (tenant, resource, account)
//! combination: the [`selector`] decides whether the resource applies to the
//! account, the [`render`] stage produces the provider manifest, and the
//! [`writer`] lays the result out under the generated output tree.
//! [`fanout::Codegen`] drives all three.

pub mod fanout;
pub mod loader;
pub mod metrics_defs;
pub mod model;
pub mod region;
pub mod render;
pub mod selector;
pub mod template;
pub mod writer;

pub use fanout::{Codegen, CodegenError, GenerationSummary, TENANTS_OUTPUT_DIR};
pub use loader::{LoadError, UpstreamConfig, load_upstream};
pub use model::{Account, CloudProvider, ResourceConfig, ResourceConfigError, TenantTuple};
pub use selector::{Matcher, MissingKeyPolicy};
