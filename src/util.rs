use nalgebra::{SMatrix, Scalar};

/// Shifts all columns such that `column[i] <- column[i + 1]` with the last two being identical.
#[inline(always)]
pub(crate) fn shift_columns_left<T: Scalar + Copy, const R: usize, const C: usize>(
    matrix: &mut SMatrix<T, R, C>,
) {
    if C > 1 {
        // Column-major storage, so a column shift is a contiguous move
        matrix.as_mut_slice().copy_within(R.., 0);
    }
}

/// Creates an array from a closure that can fail.
///
/// If a closure returns `Err`, this function will return that `Err`.
/// All previously initialized elements will be properly dropped.
#[inline(always)]
pub(crate) fn try_array_from_fn<T: Sized, E, const N: usize>(
    mut cb: impl FnMut(usize) -> Result<T, E>,
) -> Result<[T; N], E> {
    use core::mem::MaybeUninit;

    let mut array = [const { MaybeUninit::<T>::uninit() }; N];

    for i in 0..N {
        match cb(i) {
            Ok(val) => {
                array[i].write(val);
            }
            Err(e) => {
                // Drop what was already built before bailing out
                for element in array.iter_mut().take(i) {
                    unsafe {
                        element.assume_init_drop();
                    }
                }
                return Err(e);
            }
        }
    }

    // Safety: every element was written in the loop above.
    Ok(array.map(|elem| unsafe { elem.assume_init() }))
}
