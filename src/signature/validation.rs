use super::{SignatureError, SignatureErrorKind, MAX_CONTAINER_DEPTH, MAX_DEPTH, MAX_SIGNATURE_LENGTH};

const ARRAY: u8 = 1;
const STRUCT: u8 = 2;
const DICT: u8 = 3;

/// Validate that `bytes` is a well-formed sequence of complete types.
pub(crate) const fn validate(bytes: &[u8]) -> Result<(), SignatureError> {
    use SignatureErrorKind::*;

    if bytes.len() > MAX_SIGNATURE_LENGTH {
        return Err(SignatureError::new(SignatureTooLong));
    }

    // Manual stack of open containers, since this runs in const context.
    let mut kinds = [0u8; MAX_DEPTH];
    let mut counts = [0u8; MAX_DEPTH];
    let mut depth = 0usize;
    let mut arrays = 0usize;
    let mut structs = 0usize;
    let mut n = 0usize;

    while n < bytes.len() {
        let b = bytes[n];
        n += 1;

        let mut is_basic = match b {
            b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o'
            | b'g' | b'h' => true,
            b'v' => false,
            b'a' => {
                if arrays == MAX_CONTAINER_DEPTH {
                    return Err(SignatureError::new(ExceededMaximumArrayRecursion));
                }

                if depth == MAX_DEPTH {
                    return Err(SignatureError::new(ExceededMaximumDepth));
                }

                kinds[depth] = ARRAY;
                counts[depth] = 0;
                depth += 1;
                arrays += 1;
                continue;
            }
            b'(' => {
                if structs == MAX_CONTAINER_DEPTH {
                    return Err(SignatureError::new(ExceededMaximumStructRecursion));
                }

                if depth == MAX_DEPTH {
                    return Err(SignatureError::new(ExceededMaximumDepth));
                }

                kinds[depth] = STRUCT;
                counts[depth] = 0;
                depth += 1;
                structs += 1;
                continue;
            }
            b'{' => {
                if depth == 0 || kinds[depth - 1] != ARRAY {
                    return Err(SignatureError::new(DictEntryNotInsideArray));
                }

                if depth == MAX_DEPTH {
                    return Err(SignatureError::new(ExceededMaximumDepth));
                }

                kinds[depth] = DICT;
                counts[depth] = 0;
                depth += 1;
                continue;
            }
            b')' => {
                if depth == 0 {
                    return Err(SignatureError::new(StructEndedButNotStarted));
                }

                depth -= 1;

                match kinds[depth] {
                    STRUCT => {
                        if counts[depth] == 0 {
                            return Err(SignatureError::new(StructHasNoFields));
                        }

                        structs -= 1;
                    }
                    ARRAY => {
                        return Err(SignatureError::new(MissingArrayElementType));
                    }
                    _ => {
                        return Err(SignatureError::new(StructEndedButNotStarted));
                    }
                }

                false
            }
            b'}' => {
                if depth == 0 {
                    return Err(SignatureError::new(DictEndedButNotStarted));
                }

                depth -= 1;

                match kinds[depth] {
                    DICT => match counts[depth] {
                        0 | 1 => {
                            return Err(SignatureError::new(DictEntryHasOnlyOneField));
                        }
                        2 => {}
                        _ => {
                            return Err(SignatureError::new(DictEntryHasTooManyFields));
                        }
                    },
                    ARRAY => {
                        return Err(SignatureError::new(MissingArrayElementType));
                    }
                    _ => {
                        return Err(SignatureError::new(DictEndedButNotStarted));
                    }
                }

                false
            }
            b => return Err(SignatureError::new(UnknownTypeCode(b))),
        };

        // A complete type closes every array immediately enclosing it.
        while depth > 0 && kinds[depth - 1] == ARRAY {
            depth -= 1;
            arrays -= 1;
            is_basic = false;
        }

        if depth > 0 {
            if kinds[depth - 1] == DICT && counts[depth - 1] == 0 && !is_basic {
                return Err(SignatureError::new(DictKeyMustBeBasicType));
            }

            counts[depth - 1] += 1;
        }
    }

    if depth > 0 {
        return Err(SignatureError::new(match kinds[depth - 1] {
            ARRAY => MissingArrayElementType,
            STRUCT => StructStartedButNotEnded,
            _ => DictStartedButNotEnded,
        }));
    }

    Ok(())
}
