//! Descriptors as they appear in request paths.

use serde::Deserialize;
use sourcemap_store_service::types::{
    AppDescriptor, CodePushDescriptor, ContainerDescriptor, Platform,
};

/// `/:app/:platform/:version/:containerVersion`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerParams {
    pub app: String,
    pub platform: Platform,
    pub version: String,
    pub container_version: String,
}

impl From<ContainerParams> for ContainerDescriptor {
    fn from(params: ContainerParams) -> Self {
        ContainerDescriptor::new(
            AppDescriptor::new(params.app, params.platform, params.version),
            params.container_version,
        )
    }
}

/// `/:app/:platform/:version/:deploymentName/:label`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodePushParams {
    pub app: String,
    pub platform: Platform,
    pub version: String,
    pub deployment_name: String,
    pub label: String,
}

impl From<CodePushParams> for CodePushDescriptor {
    fn from(params: CodePushParams) -> Self {
        CodePushDescriptor::new(
            AppDescriptor::new(params.app, params.platform, params.version),
            params.deployment_name,
            params.label,
        )
    }
}

/// `/:app/:platform/:version/:deploymentName/:label/:toVersion/:toDeploymentName/:toLabel`
///
/// The target release belongs to the same application and platform as the source.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyParams {
    pub app: String,
    pub platform: Platform,
    pub version: String,
    pub deployment_name: String,
    pub label: String,
    pub to_version: String,
    pub to_deployment_name: String,
    pub to_label: String,
}

impl CopyParams {
    /// Splits into the source and the target descriptor.
    pub fn into_descriptors(self) -> (CodePushDescriptor, CodePushDescriptor) {
        let from = CodePushDescriptor::new(
            AppDescriptor::new(self.app.clone(), self.platform, self.version),
            self.deployment_name,
            self.label,
        );
        let to = CodePushDescriptor::new(
            AppDescriptor::new(self.app, self.platform, self.to_version),
            self.to_deployment_name,
            self.to_label,
        );
        (from, to)
    }
}
