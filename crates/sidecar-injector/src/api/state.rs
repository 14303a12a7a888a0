use crate::admission::AdmissionCodec;
use crate::injection::Mutator;

pub(crate) struct ApiServerState {
    pub(crate) codec: AdmissionCodec,
    pub(crate) mutator: Mutator,
}
