#[derive(Debug)]
pub struct Shutdown(
    tokio::sync::broadcast::Sender<()>,
    tokio::sync::broadcast::Receiver<()>,
);

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        Shutdown(tx, rx)
    }

    pub fn shutdown(&self) {
        // no receivers left means everything already stopped
        let _ = self.0.send(());
    }

    /// Resolves once shutdown has been signalled or every sender is gone.
    pub async fn wait(&mut self) {
        let _ = self.1.recv().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Shutdown(self.0.clone(), self.0.subscribe())
    }
}
