use std::cell::{Cell, RefCell};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;

/// Upper bounds on the number of tree nodes fetched per direction, keeping
/// response size and backend load bounded.
const NUMBER_OF_ANCESTORS: u64 = 200;
const NUMBER_OF_DESCENDANTS: u64 = 1000;

/// Parameters of one tree fetch. The limit fields are `None` on the caller's
/// request and filled in with the limits actually applied when results are
/// dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeFetchParameters {
    pub database_document_id: String,
    pub indices: Vec<String>,
    pub requested_ancestors: Option<u64>,
    pub requested_descendants: Option<u64>,
}

impl TreeFetchParameters {
    pub fn new(database_document_id: String, indices: Vec<String>) -> Self {
        Self {
            database_document_id,
            indices,
            requested_ancestors: None,
            requested_descendants: None,
        }
    }
}

/// Which event schema an entity's documents use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSchema {
    Legacy,
    Current,
}

/// One concrete entity a display identifier resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolverEntity {
    pub id: String,
    pub schema: EventSchema,
    pub name: Option<String>,
}

/// One process node of a fetched tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolverNode {
    pub id: String,
    pub parent: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewResolverTree {
    pub origin_id: String,
    pub nodes: Vec<ResolverNode>,
}

/// A bounded request for one entity's ancestors and descendants.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRequest {
    pub entity_id: String,
    pub schema: EventSchema,
    pub indices: Vec<String>,
    pub ancestors: u64,
    pub descendants: u64,
}

/// Lifecycle events dispatched to the caller. Each carries the parameters
/// that produced it so callers can correlate dispatches to requests
/// unambiguously.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolverAction {
    AppRequestedResolverData {
        parameters: TreeFetchParameters,
    },
    ServerReturnedResolverData {
        result: NewResolverTree,
        parameters: TreeFetchParameters,
    },
    ServerFailedToReturnResolverData {
        parameters: TreeFetchParameters,
    },
    AppAbortedResolverDataRequest {
        parameters: TreeFetchParameters,
    },
}

/// Entity resolution and tree retrieval against the search backend. The
/// cancellation token lets implementations stop between round-trips once the
/// request is superseded.
#[async_trait(?Send)]
pub trait DataAccessLayer {
    async fn entities(
        &self,
        document_id: &str,
        indices: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<ResolverEntity>>;

    async fn resolver_tree(
        &self,
        request: &TreeRequest,
        token: &CancellationToken,
    ) -> Result<Vec<ResolverNode>>;
}

/// Cancellable, single-flight tree fetch loop.
///
/// Exactly one attempt is live at a time: starting a fetch cancels the token
/// of any in-flight one. The superseded attempt dispatches
/// `AppAbortedResolverDataRequest` for its own parameters, and any of its
/// late results are discarded by the generation check so they can never
/// overwrite data returned by the superseding request.
pub struct ResolverTreeFetcher<D> {
    dal: D,
    dispatch: UnboundedSender<ResolverAction>,
    current_token: RefCell<Option<CancellationToken>>,
    generation: Cell<u64>,
}

impl<D: DataAccessLayer> ResolverTreeFetcher<D> {
    pub fn new(dal: D, dispatch: UnboundedSender<ResolverAction>) -> Self {
        Self {
            dal,
            dispatch,
            current_token: RefCell::new(None),
            generation: Cell::new(0),
        }
    }

    /// Resolve the document id to an entity and fetch its bounded tree,
    /// reporting every outcome through the dispatch channel. Nothing
    /// propagates past this boundary as an error.
    pub async fn fetch(&self, parameters: TreeFetchParameters) {
        let (token, generation) = self.begin_attempt();

        // Without this dispatch the caller would re-trigger the same request
        // while this one is outstanding.
        self.dispatch(ResolverAction::AppRequestedResolverData {
            parameters: parameters.clone(),
        });

        let entities = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.dispatch(ResolverAction::AppAbortedResolverDataRequest {
                    parameters: parameters.clone(),
                });
                return;
            }
            entities = self.dal.entities(
                &parameters.database_document_id,
                &parameters.indices,
                &token,
            ) => entities,
        };

        let entities = match entities {
            Ok(entities) => entities,
            Err(err) => {
                self.resolve_failure(generation, &token, parameters, err);
                return;
            }
        };

        let Some(entity) = entities.into_iter().next() else {
            warn!(
                "No entity matched document {}",
                parameters.database_document_id
            );
            self.dispatch_if_current(
                generation,
                ResolverAction::ServerFailedToReturnResolverData { parameters },
            );
            return;
        };

        debug!(
            "document {} resolved to entity {} ({})",
            parameters.database_document_id,
            entity.id,
            entity.name.as_deref().unwrap_or("unknown process"),
        );

        let request = TreeRequest {
            entity_id: entity.id.clone(),
            schema: entity.schema,
            indices: parameters.indices.clone(),
            ancestors: NUMBER_OF_ANCESTORS,
            descendants: NUMBER_OF_DESCENDANTS,
        };

        let nodes = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.dispatch(ResolverAction::AppAbortedResolverDataRequest {
                    parameters: parameters.clone(),
                });
                return;
            }
            nodes = self.dal.resolver_tree(&request, &token) => nodes,
        };

        match nodes {
            Ok(nodes) => {
                let parameters = TreeFetchParameters {
                    requested_ancestors: Some(NUMBER_OF_ANCESTORS),
                    requested_descendants: Some(NUMBER_OF_DESCENDANTS),
                    ..parameters
                };
                self.dispatch_if_current(
                    generation,
                    ResolverAction::ServerReturnedResolverData {
                        result: NewResolverTree {
                            origin_id: entity.id,
                            nodes,
                        },
                        parameters,
                    },
                );
            }
            Err(err) => self.resolve_failure(generation, &token, parameters, err),
        }
    }

    /// Cancel the in-flight attempt, if any, and make a fresh one current.
    fn begin_attempt(&self) -> (CancellationToken, u64) {
        let mut current = self.current_token.borrow_mut();
        if let Some(previous) = current.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        *current = Some(token.clone());

        (token, generation)
    }

    /// Cancellation is the only legitimate cause of an aborted dispatch; any
    /// other error from a still-current attempt is a failure.
    fn resolve_failure(
        &self,
        generation: u64,
        token: &CancellationToken,
        parameters: TreeFetchParameters,
        err: Error,
    ) {
        if token.is_cancelled() {
            self.dispatch(ResolverAction::AppAbortedResolverDataRequest { parameters });
        } else {
            warn!(
                "Failed to retrieve resolver data for {}: {err:#}",
                parameters.database_document_id
            );
            self.dispatch_if_current(
                generation,
                ResolverAction::ServerFailedToReturnResolverData { parameters },
            );
        }
    }

    fn dispatch_if_current(&self, generation: u64, action: ResolverAction) {
        if self.generation.get() == generation {
            self.dispatch(action);
        } else {
            debug!("discarding dispatch from a superseded tree fetch");
        }
    }

    fn dispatch(&self, action: ResolverAction) {
        if self.dispatch.send(action).is_err() {
            debug!("resolver action dropped, the receiver is gone");
        }
    }
}
