use crate::engine::EngineHandle;
use facegallery_core::{respond, ServiceReply};
use zbus::interface;

pub const BUS_NAME: &str = "org.facegallery.Gallery1";
pub const OBJECT_PATH: &str = "/org/facegallery/Gallery1";

/// D-Bus interface for the face gallery daemon.
///
/// Bus name: org.facegallery.Gallery1
/// Object path: /org/facegallery/Gallery1
///
/// Every method returns a JSON document `{"status": u16, "body": {...}}`.
/// Request errors are reported in the document rather than as D-Bus errors.
pub struct GalleryInterface {
    engine: EngineHandle,
}

impl GalleryInterface {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.facegallery.Gallery1")]
impl GalleryInterface {
    /// Detect faces in an encoded image.
    async fn detect(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "detect requested");
        let reply = self
            .engine
            .call("detect", move |service| respond(service.detect(&image)))
            .await;
        encode(reply)
    }

    /// Match the face in an encoded image against the gallery.
    async fn recognize(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "recognize requested");
        let reply = self
            .engine
            .call("recognize", move |service| respond(service.recognize(&image)))
            .await;
        encode(reply)
    }

    /// Store an encoded image as a reference for `label`.
    async fn add_face(&self, image: Vec<u8>, label: String) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), label = %label, "add_face requested");
        let reply = self
            .engine
            .call("add_face", move |service| respond(service.add_face(&image, &label)))
            .await;
        encode(reply)
    }

    /// List labels and their reference counts.
    async fn gallery(&self) -> zbus::fdo::Result<String> {
        let reply = self
            .engine
            .call("gallery", |service| respond(service.gallery()))
            .await;
        encode(reply)
    }

    /// Remove one reference by id (`"<label>/<file>"`).
    async fn remove_reference(&self, id: String) -> zbus::fdo::Result<String> {
        tracing::info!(id = %id, "remove_reference requested");
        let reply = self
            .engine
            .call("remove_reference", move |service| respond(service.remove_reference(&id)))
            .await;
        encode(reply)
    }

    /// Remove a label and all of its references.
    async fn remove_label(&self, label: String) -> zbus::fdo::Result<String> {
        tracing::info!(label = %label, "remove_label requested");
        let reply = self
            .engine
            .call("remove_label", move |service| respond(service.remove_label(&label)))
            .await;
        encode(reply)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let reply = self
            .engine
            .call("status", |service| respond(service.status()))
            .await;
        encode(reply)
    }
}

fn encode(reply: ServiceReply) -> zbus::fdo::Result<String> {
    serde_json::to_string(&reply).map_err(|e| zbus::fdo::Error::Failed(format!("encoding reply: {e}")))
}
