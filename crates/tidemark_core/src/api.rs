use async_trait::async_trait;

use crate::{
    Aggregate, CODE_COLUMN, ENTITY_ID_COLUMN, Frame, OrderBy, QueryOutput, QueryRequest,
    ReturnShape, SchemaDescriptor, TidemarkResult, Timestamp, UpsertOptions,
};

#[async_trait]
pub trait QueryApi: Send + Sync {
    async fn query(
        &self,
        schema: &SchemaDescriptor,
        request: &QueryRequest,
    ) -> TidemarkResult<QueryOutput>;

    async fn count(&self, schema: &SchemaDescriptor, request: &QueryRequest)
    -> TidemarkResult<u64>;

    async fn exists_by_id(
        &self,
        schema: &SchemaDescriptor,
        id: &str,
        provider: Option<&str>,
    ) -> TidemarkResult<bool>;

    /// One row per distinct `column` value with the aggregate in a column named
    /// after the aggregate (`count`, `sum`, ...).
    async fn group_by(
        &self,
        schema: &SchemaDescriptor,
        column: &str,
        aggregate: Aggregate,
        target: Option<&str>,
        request: &QueryRequest,
    ) -> TidemarkResult<Frame>;

    async fn latest_timestamp(
        &self,
        schema: &SchemaDescriptor,
        request: &QueryRequest,
    ) -> TidemarkResult<Option<Timestamp>>;

    /// Rows of the entity schema registered for `entity_type`, ordered by code
    /// unless the request orders otherwise.
    async fn query_entities(
        &self,
        entity_type: &str,
        request: &QueryRequest,
    ) -> TidemarkResult<Frame>;

    async fn query_frame(
        &self,
        schema: &SchemaDescriptor,
        request: &QueryRequest,
    ) -> TidemarkResult<Frame> {
        let request = request.clone().shape(ReturnShape::Frame);
        self.query(schema, &request).await?.into_frame()
    }

    async fn entity_ids(
        &self,
        entity_type: &str,
        request: &QueryRequest,
    ) -> TidemarkResult<Vec<String>> {
        let mut request = request.clone().columns([ENTITY_ID_COLUMN]);
        if request.order.is_empty() {
            request = request.order_by(OrderBy::asc(CODE_COLUMN));
        }
        let frame = self.query_entities(entity_type, &request).await?;
        Ok(frame
            .column(ENTITY_ID_COLUMN)
            .unwrap_or_default()
            .iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect())
    }
}

#[async_trait]
pub trait PersistApi: Send + Sync {
    /// Writes a frame into the schema's table; returns the number of rows written.
    async fn upsert(
        &self,
        schema: &SchemaDescriptor,
        provider: &str,
        frame: &Frame,
        options: UpsertOptions,
    ) -> TidemarkResult<usize>;

    async fn delete(&self, schema: &SchemaDescriptor, request: &QueryRequest)
    -> TidemarkResult<u64>;
}
