use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no providers registered for tier {0:?}")]
    NoProviders(coterie_types::TaskTier),

    #[error("daily budget of ${budget:.2} reached (spent ${spent:.2}); refusing call")]
    BudgetExhausted { spent: f64, budget: f64 },

    #[error("every candidate provider failed for tier {tier:?}: {detail}")]
    ProviderExhausted {
        tier: coterie_types::TaskTier,
        detail: String,
    },

    #[error("store error: {0}")]
    Store(#[from] coterie_store::StoreError),
}

pub type RouterResult<T> = Result<T, RouterError>;
