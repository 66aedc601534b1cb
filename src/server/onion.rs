/// A request handler that can be wrapped by [`Layer`]s.
pub trait Service<Request> {
    type Response;
    type Error;
    async fn call(&self, req: Request) -> Result<Self::Response, Self::Error>;
}

/// Wraps an inner service into another one, like the skin of an onion.
pub trait Layer<S> {
    type Service;
    fn layer(&self, inner: S) -> Self::Service;
}

/// Stacks layers around a service. The last layer added is the outermost
/// and sees each request first.
pub struct ServiceStack<S> {
    service: S,
}

impl<S> ServiceStack<S> {
    pub fn new(service: S) -> Self {
        ServiceStack { service }
    }
    pub fn layer<L>(self, layer: L) -> ServiceStack<L::Service>
    where
        L: Layer<S>,
    {
        ServiceStack::new(layer.layer(self.service))
    }
    pub fn build(self) -> S {
        self.service
    }
}
