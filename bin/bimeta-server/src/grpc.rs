//! gRPC adapter for the `bimeta.v1.Meta` service

use crate::handler::MetaHandler;
use bimeta_proto::Meta;
use bimeta_proto::payload::{
    Empty, MetaKey, MetaKeyVal, MetaKeyVals, MetaKeys, MetaVal, MetaVals,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Meta service implementation
pub struct MetaService {
    handler: Arc<MetaHandler>,
}

impl MetaService {
    pub const fn new(handler: Arc<MetaHandler>) -> Self {
        Self { handler }
    }
}

#[tonic::async_trait]
impl Meta for MetaService {
    async fn get_meta(&self, request: Request<MetaKey>) -> Result<Response<MetaVal>, Status> {
        let req = request.into_inner();
        let val = self.handler.get_meta(&req.key).await?;
        Ok(Response::new(MetaVal { val }))
    }

    async fn get_metas(&self, request: Request<MetaKeys>) -> Result<Response<MetaVals>, Status> {
        let req = request.into_inner();
        let vals = self.handler.get_metas(&req.keys).await?;
        Ok(Response::new(MetaVals { vals }))
    }

    async fn get_meta_inverse(
        &self,
        request: Request<MetaVal>,
    ) -> Result<Response<MetaKey>, Status> {
        let req = request.into_inner();
        let key = self.handler.get_meta_inverse(&req.val).await?;
        Ok(Response::new(MetaKey { key }))
    }

    async fn get_metas_inverse(
        &self,
        request: Request<MetaVals>,
    ) -> Result<Response<MetaKeys>, Status> {
        let req = request.into_inner();
        let keys = self.handler.get_metas_inverse(&req.vals).await?;
        Ok(Response::new(MetaKeys { keys }))
    }

    async fn set_meta(&self, request: Request<MetaKeyVal>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        self.handler.set_meta(&req.key, &req.val).await?;
        Ok(Response::new(Empty {}))
    }

    async fn set_metas(&self, request: Request<MetaKeyVals>) -> Result<Response<Empty>, Status> {
        let kvs: Vec<(String, String)> = request
            .into_inner()
            .kvs
            .into_iter()
            .map(|kv| (kv.key, kv.val))
            .collect();
        self.handler.set_metas(&kvs).await?;
        Ok(Response::new(Empty {}))
    }

    async fn delete_meta(&self, request: Request<MetaKey>) -> Result<Response<MetaVal>, Status> {
        let req = request.into_inner();
        let val = self.handler.delete_meta(&req.key).await?;
        Ok(Response::new(MetaVal { val }))
    }

    async fn delete_metas(
        &self,
        request: Request<MetaKeys>,
    ) -> Result<Response<MetaVals>, Status> {
        let req = request.into_inner();
        let vals = self.handler.delete_metas(&req.keys).await?;
        Ok(Response::new(MetaVals { vals }))
    }

    async fn delete_meta_inverse(
        &self,
        request: Request<MetaVal>,
    ) -> Result<Response<MetaKey>, Status> {
        let req = request.into_inner();
        let key = self.handler.delete_meta_inverse(&req.val).await?;
        Ok(Response::new(MetaKey { key }))
    }

    async fn delete_metas_inverse(
        &self,
        request: Request<MetaVals>,
    ) -> Result<Response<MetaKeys>, Status> {
        let req = request.into_inner();
        let keys = self.handler.delete_metas_inverse(&req.vals).await?;
        Ok(Response::new(MetaKeys { keys }))
    }
}
