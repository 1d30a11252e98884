use crate::*;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use gcloud_sdk::google::firestore::v1::*;
use rsb_derive::*;
use serde::Deserialize;
use tracing::*;

#[derive(Debug, Eq, PartialEq, Clone, Builder)]
pub struct FirestoreListDocParams {
    pub collection_id: String,

    pub parent: Option<String>,

    #[default = "100"]
    pub page_size: usize,

    pub page_token: Option<String>,
    pub order_by: Option<Vec<FirestoreQueryOrder>>,
    pub return_only_fields: Option<Vec<String>>,
}

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreListDocResult {
    pub documents: Vec<Document>,
    pub page_token: Option<String>,
}

#[derive(Debug, Eq, PartialEq, Clone, Builder)]
pub struct FirestoreListCollectionIdsParams {
    pub parent: Option<String>,

    #[default = "100"]
    pub page_size: usize,
    pub page_token: Option<String>,
}

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreListCollectionIdsResult {
    pub collection_ids: Vec<String>,
    pub page_token: Option<String>,
}

#[async_trait]
pub trait FirestoreListingSupport {
    async fn list_doc(
        &self,
        params: FirestoreListDocParams,
    ) -> FirestoreResult<FirestoreListDocResult>;

    async fn stream_list_doc<'b>(
        &self,
        params: FirestoreListDocParams,
    ) -> FirestoreResult<BoxStream<'b, FirestoreResult<Document>>>;

    async fn stream_list_obj<'b, T>(
        &self,
        params: FirestoreListDocParams,
    ) -> FirestoreResult<BoxStream<'b, FirestoreResult<T>>>
    where
        for<'de> T: Deserialize<'de> + Send + 'b;

    async fn list_collection_ids(
        &self,
        params: FirestoreListCollectionIdsParams,
    ) -> FirestoreResult<FirestoreListCollectionIdsResult>;

    async fn stream_list_collection_ids<'b>(
        &self,
        params: FirestoreListCollectionIdsParams,
    ) -> FirestoreResult<BoxStream<'b, FirestoreResult<String>>>;
}

impl FirestoreDb {
    fn create_list_request(
        &self,
        params: &FirestoreListDocParams,
    ) -> FirestoreResult<gcloud_sdk::tonic::Request<ListDocumentsRequest>> {
        Ok(gcloud_sdk::tonic::Request::new(ListDocumentsRequest {
            parent: params
                .parent
                .as_ref()
                .unwrap_or_else(|| self.get_documents_path())
                .clone(),
            collection_id: params.collection_id.clone(),
            page_size: params.page_size as i32,
            page_token: params.page_token.clone().unwrap_or_default(),
            order_by: params
                .order_by
                .as_ref()
                .map(|orders| {
                    orders
                        .iter()
                        .map(|order| format!("{} {}", order.field_name, order.direction))
                        .collect::<Vec<String>>()
                        .join(", ")
                })
                .unwrap_or_default(),
            mask: params
                .return_only_fields
                .as_ref()
                .map(|masks| DocumentMask {
                    field_paths: masks.clone(),
                }),
            consistency_selector: self
                .get_session_params()
                .consistency_selector
                .as_ref()
                .map(|selector| selector.try_into())
                .transpose()?,
            ..Default::default()
        }))
    }
}

#[async_trait]
impl FirestoreListingSupport for FirestoreDb {
    async fn list_doc(
        &self,
        params: FirestoreListDocParams,
    ) -> FirestoreResult<FirestoreListDocResult> {
        let span = span!(
            Level::DEBUG,
            "Firestore List Documents",
            "/firestore/collection_name" = params.collection_id.as_str(),
        );

        let request = self.create_list_request(&params)?;
        let response = self.client().get().list_documents(request).await?.into_inner();

        span.in_scope(|| {
            debug!(
                documents = response.documents.len(),
                "Listed a page of documents.",
            )
        });

        Ok(FirestoreListDocResult::new(response.documents).opt_page_token(
            if response.next_page_token.is_empty() {
                None
            } else {
                Some(response.next_page_token)
            },
        ))
    }

    async fn stream_list_doc<'b>(
        &self,
        params: FirestoreListDocParams,
    ) -> FirestoreResult<BoxStream<'b, FirestoreResult<Document>>> {
        let db = self.clone();
        let stream = futures::stream::unfold(
            Some(params),
            move |maybe_params| {
                let db = db.clone();
                async move {
                    let params = maybe_params?;
                    match db.list_doc(params.clone()).await {
                        Ok(result) => {
                            let next_params = result
                                .page_token
                                .clone()
                                .map(|token| params.with_page_token(token));
                            Some((Ok(result.documents), next_params))
                        }
                        Err(err) => Some((Err(err), None)),
                    }
                }
            },
        )
        .flat_map(|page| {
            futures::stream::iter(match page {
                Ok(documents) => documents.into_iter().map(Ok).collect(),
                Err(err) => vec![Err(err)],
            })
        })
        .boxed();

        Ok(stream)
    }

    async fn stream_list_obj<'b, T>(
        &self,
        params: FirestoreListDocParams,
    ) -> FirestoreResult<BoxStream<'b, FirestoreResult<T>>>
    where
        for<'de> T: Deserialize<'de> + Send + 'b,
    {
        let doc_stream = self.stream_list_doc(params).await?;

        Ok(Box::pin(doc_stream.map(|doc_res| {
            doc_res.and_then(|doc| Self::deserialize_doc_to::<T>(&doc))
        })))
    }

    async fn list_collection_ids(
        &self,
        params: FirestoreListCollectionIdsParams,
    ) -> FirestoreResult<FirestoreListCollectionIdsResult> {
        let request = gcloud_sdk::tonic::Request::new(ListCollectionIdsRequest {
            parent: params
                .parent
                .as_ref()
                .unwrap_or_else(|| self.get_documents_path())
                .clone(),
            page_size: params.page_size as i32,
            page_token: params.page_token.clone().unwrap_or_default(),
            consistency_selector: self
                .get_session_params()
                .consistency_selector
                .as_ref()
                .map(|selector| selector.try_into())
                .transpose()?,
        });

        let response = self
            .client()
            .get()
            .list_collection_ids(request)
            .await?
            .into_inner();

        Ok(
            FirestoreListCollectionIdsResult::new(response.collection_ids).opt_page_token(
                if response.next_page_token.is_empty() {
                    None
                } else {
                    Some(response.next_page_token)
                },
            ),
        )
    }

    async fn stream_list_collection_ids<'b>(
        &self,
        params: FirestoreListCollectionIdsParams,
    ) -> FirestoreResult<BoxStream<'b, FirestoreResult<String>>> {
        let db = self.clone();
        let stream = futures::stream::unfold(
            Some(params),
            move |maybe_params| {
                let db = db.clone();
                async move {
                    let params = maybe_params?;
                    match db.list_collection_ids(params.clone()).await {
                        Ok(result) => {
                            let next_params = result
                                .page_token
                                .clone()
                                .map(|token| params.with_page_token(token));
                            Some((Ok(result.collection_ids), next_params))
                        }
                        Err(err) => Some((Err(err), None)),
                    }
                }
            },
        )
        .flat_map(|page| {
            futures::stream::iter(match page {
                Ok(ids) => ids.into_iter().map(Ok).collect(),
                Err(err) => vec![Err(err)],
            })
        })
        .boxed();

        Ok(stream)
    }
}
